//! Connection properties and engine timing knobs.

use clap::Args;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Broker, credential and schema registry properties shared by every reader.
#[derive(Args, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct KafkaProperties {
    /// Kafka brokers (comma-separated, e.g., "localhost:9092")
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    pub bootstrap_servers: String,

    /// SASL/PLAIN username; SASL is disabled when unset
    #[arg(long, env = "KAFKA_SASL_USERNAME")]
    pub sasl_username: Option<String>,

    #[arg(long, env = "KAFKA_SASL_PASSWORD")]
    pub sasl_password: Option<String>,

    /// PEM file with the CA certificate used to trust the brokers
    #[arg(long, env = "KAFKA_CA_CERT")]
    pub ca_cert_path: Option<PathBuf>,

    /// Deployment environment name. "dev" and "qa" relax TLS verification.
    #[arg(long, env = "VERIFY_ENVIRONMENT", default_value = "dev")]
    pub environment: String,

    /// Prefix for generated consumer group ids
    #[arg(long, default_value = "kafka-verify-")]
    pub group_prefix: String,

    /// Confluent-compatible schema registry base URL
    #[arg(long, env = "SCHEMA_REGISTRY_URL")]
    pub schema_registry_url: Option<String>,

    #[arg(long, env = "SCHEMA_REGISTRY_USERNAME")]
    pub schema_registry_username: Option<String>,

    #[arg(long, env = "SCHEMA_REGISTRY_PASSWORD")]
    pub schema_registry_password: Option<String>,
}

impl Default for KafkaProperties {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            sasl_username: None,
            sasl_password: None,
            ca_cert_path: None,
            environment: "dev".to_string(),
            group_prefix: "kafka-verify-".to_string(),
            schema_registry_url: None,
            schema_registry_username: None,
            schema_registry_password: None,
        }
    }
}

impl KafkaProperties {
    /// Whether broker certificate verification may be skipped.
    pub fn relax_tls(&self) -> bool {
        matches!(self.environment.to_ascii_lowercase().as_str(), "dev" | "qa")
    }

    /// SASL credentials, only when both halves are present.
    pub fn sasl_credentials(&self) -> Option<(&str, &str)> {
        match (&self.sasl_username, &self.sasl_password) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

/// Timing and sizing knobs of the engine loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for catching up to "now" before matching starts
    pub preseed_deadline: Duration,
    /// Timeout of the initial offset-establishing commit
    pub commit_timeout: Duration,
    /// Fixed sleep after recreating a client on a transient error
    pub reconnect_backoff: Duration,
    /// Idle tick of the bundle map writer task
    pub scan_interval: Duration,
    /// Upper bound of a single poll
    pub poll_max_wait: Duration,
    pub session_timeout: Duration,
    pub fetch_max_bytes: usize,
    /// Cap on client recreations per reader. `None` retries forever.
    pub max_reconnects: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preseed_deadline: Duration::from_secs(10),
            commit_timeout: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(2),
            scan_interval: Duration::from_secs(1),
            poll_max_wait: Duration::from_secs(1),
            session_timeout: Duration::from_secs(300),
            fetch_max_bytes: 10 * 1024 * 1024,
            max_reconnects: None,
        }
    }
}
