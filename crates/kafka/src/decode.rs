use crate::error::Result;
use crate::registry::TopicType;
use crate::schema::SchemaCache;
use kafka_types::{json_object, FieldMap};

/// Decode a record key or value into its top-level fields.
///
/// Empty payloads (keyless records, tombstones) decode to an empty map.
pub async fn decode_fields(
    bytes: &[u8],
    topic_type: TopicType,
    schemas: &SchemaCache,
) -> Result<FieldMap> {
    if bytes.is_empty() {
        return Ok(FieldMap::new());
    }
    match topic_type {
        TopicType::Avro => schemas.decode(bytes).await,
        TopicType::Json => Ok(json_object(bytes)?),
    }
}
