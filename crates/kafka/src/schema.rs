//! Schema registry access and the id-indexed schema cache.
//!
//! Registered schema ids are immutable, so entries are never invalidated.

use crate::config::KafkaProperties;
use crate::error::{Error, Result};
use apache_avro::schema::ResolvedSchema;
use apache_avro::Schema;
use async_trait::async_trait;
use kafka_types::{avro_to_field_map, parse_wire_header, FieldMap, Names};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Fetches a schema body by its numeric registry id.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch_schema(&self, id: u32) -> Result<String>;
}

/// Confluent-compatible registry over HTTP.
pub struct HttpSchemaRegistry {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

#[derive(Deserialize)]
struct SchemaResponse {
    schema: String,
}

impl HttpSchemaRegistry {
    pub fn new(base_url: impl Into<String>, credentials: Option<(String, String)>) -> Result<Self> {
        Self::with_tls(base_url, credentials, None, false)
    }

    /// Registry client trusting the PEM CA at `ca_cert_path` in addition to the
    /// built-in roots. `accept_invalid_certs` skips verification entirely.
    pub fn with_tls(
        base_url: impl Into<String>,
        credentials: Option<(String, String)>,
        ca_cert_path: Option<&Path>,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(10));
        if let Some(path) = ca_cert_path {
            let pem = std::fs::read(path).map_err(|e| {
                Error::InvalidConfig(format!("Failed to read CA certificate {}: {e}", path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                Error::InvalidConfig(format!("Invalid CA certificate {}: {e}", path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if accept_invalid_certs {
            debug!("Schema registry certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| Error::SchemaRegistry(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Registry from properties; `None` when no registry URL is configured.
    pub fn from_properties(properties: &KafkaProperties) -> Result<Option<Self>> {
        let Some(url) = &properties.schema_registry_url else {
            return Ok(None);
        };
        let credentials = properties
            .schema_registry_username
            .clone()
            .map(|user| {
                (
                    user,
                    properties.schema_registry_password.clone().unwrap_or_default(),
                )
            });
        Self::with_tls(
            url.clone(),
            credentials,
            properties.ca_cert_path.as_deref(),
            properties.relax_tls(),
        )
        .map(Some)
    }

    fn schema_url(&self, id: u32) -> String {
        format!("{}/schemas/ids/{id}", self.base_url)
    }
}

#[async_trait]
impl SchemaSource for HttpSchemaRegistry {
    async fn fetch_schema(&self, id: u32) -> Result<String> {
        let url = self.schema_url(id);
        debug!("Fetching schema {id} from {url}");

        let mut request = self.client.get(&url);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::SchemaRegistry(format!("Failed to fetch schema {id}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SchemaRegistry(format!(
                "Schema registry returned status {status} for {url}"
            )));
        }

        let body: SchemaResponse = response
            .json()
            .await
            .map_err(|e| Error::SchemaRegistry(format!("Invalid schema response for {id}: {e}")))?;
        Ok(body.schema)
    }
}

/// A parsed schema together with the named types it defines.
pub struct CachedSchema {
    pub schema: Schema,
    pub names: Names,
}

impl CachedSchema {
    pub fn parse(body: &str) -> Result<Self> {
        let schema = Schema::parse_str(body).map_err(|e| Error::AvroSchema(e.to_string()))?;
        let names = ResolvedSchema::try_from(&schema)
            .map_err(|e| Error::AvroSchema(e.to_string()))?
            .get_names()
            .iter()
            .map(|(name, s)| (name.clone(), (*s).clone()))
            .collect();
        Ok(Self { schema, names })
    }
}

pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    entries: RwLock<HashMap<u32, Arc<CachedSchema>>>,
}

impl SchemaCache {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a schema, fetching it from the registry on a miss.
    ///
    /// The write lock is held across the fetch so concurrent decoders of the
    /// same unseen id trigger a single registry request.
    pub async fn get(&self, id: u32) -> Result<Arc<CachedSchema>> {
        if let Some(entry) = self.entries.read().await.get(&id) {
            return Ok(Arc::clone(entry));
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(&id) {
            return Ok(Arc::clone(entry));
        }

        let body = self.source.fetch_schema(id).await?;
        let entry = Arc::new(CachedSchema::parse(&body)?);
        entries.insert(id, Arc::clone(&entry));
        debug!("Cached schema {id}");
        Ok(entry)
    }

    /// Decode a framed Avro payload into its top-level fields.
    pub async fn decode(&self, bytes: &[u8]) -> Result<FieldMap> {
        let (id, mut datum) = parse_wire_header(bytes)?;
        let cached = self.get(id).await?;
        let value = apache_avro::from_avro_datum(&cached.schema, &mut datum, None)
            .map_err(|e| kafka_types::KafkaTypesError::AvroDecode(e.to_string()))?;
        Ok(avro_to_field_map(value, &cached.schema, &cached.names)?)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// [`SchemaSource`] used when no registry is configured: every lookup fails.
pub struct NoSchemaRegistry;

#[async_trait]
impl SchemaSource for NoSchemaRegistry {
    async fn fetch_schema(&self, id: u32) -> Result<String> {
        Err(Error::SchemaRegistry(format!(
            "no schema registry configured, cannot resolve schema {id}"
        )))
    }
}
