//! kafka-verify Library
//!
//! Verifies that actions taken by a test harness produce the Kafka records they
//! should. Tests register expectations ("test bundles") on per-topic readers;
//! the engine consumes the topics and resolves each bundle when a matching
//! record arrives.
//!
//! # Features
//!
//! - Per-topic readers with consumer-group identity preserved across reconnects
//! - Avro payloads through a schema registry cache, JSON payloads directly
//! - Business-key filtering, dotted logical keys and exact value comparison
//! - Fatal reader conditions reported once per reader on an error channel
//!
//! # Crates
//!
//! - `kafka_types` - decoded payload model and Avro/JSON conversions
//! - `kafka_verify_engine` - readers, registry, engine loop and matching
//!
//! # Usage
//!
//! ```ignore
//! let config = kafka_verify::config::VerifyConfig::load(Path::new("verify.toml"))?;
//! let registry = kafka_verify::connect(&config)?;
//! let reader = registry.new_test_reader(&TopicSpec::json("orders"), None)?;
//! reader.register_test("order_created");
//! let (errors, _rx) = tokio::sync::mpsc::unbounded_channel();
//! registry.start_all_engines(errors, None);
//! let bundle = reader
//!     .test_expected(
//!         TestBundle::new("order_created")
//!             .expect_key("tenant", "42")
//!             .expect_logical_key("EventType", "CREATED")
//!             .expect_value("Status", "OK"),
//!     )
//!     .await;
//! bundle.wait().await?;
//! ```

pub mod config;

pub use kafka_types as types;
pub use kafka_verify_engine as engine;

pub use config::VerifyConfig;
pub use kafka_types::{DecodedValue, ExpectedValue, FieldMap, Record};
pub use kafka_verify_engine::{
    test_sequence_expected, test_wait, EngineConfig, Error, KafkaProperties, MatchError,
    ProgressSink, ReadySignal, ReaderError, ReaderKey, ReaderMode, RegistryService,
    StateTracker, TestBundle, TopicReader, TopicSpec, TopicType,
};

use anyhow::Context;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Safe to call more than once.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .ok(); // Ignore if already initialized
}

/// Build a reader registry backed by rdkafka from a loaded configuration.
pub fn connect(config: &VerifyConfig) -> anyhow::Result<RegistryService> {
    let engine = config.engine_config()?;
    tracing::info!(
        "Connecting to {} ({} environment)",
        config.kafka.bootstrap_servers,
        config.kafka.environment
    );
    RegistryService::from_properties(config.kafka.clone(), engine)
        .context("Failed to create reader registry")
}
