//! File-based configuration.
//!
//! ```toml
//! [kafka]
//! bootstrap_servers = "broker-1:9093,broker-2:9093"
//! sasl_username = "verify"
//! sasl_password = "secret"
//! ca_cert_path = "/etc/kafka/ca.pem"
//! environment = "qa"
//! schema_registry_url = "https://registry.internal"
//!
//! [engine]
//! preseed_deadline = "10s"
//! reconnect_backoff = "2s"
//! poll_max_wait = "500ms"
//! max_reconnects = 5
//! ```

pub mod duration;

pub use duration::parse_duration;

use anyhow::Context;
use kafka_verify_engine::{EngineConfig, KafkaProperties};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub kafka: KafkaProperties,
    pub engine: EngineSection,
}

/// `[engine]` table. Unset entries keep the [`EngineConfig`] defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub preseed_deadline: Option<String>,
    pub commit_timeout: Option<String>,
    pub reconnect_backoff: Option<String>,
    pub scan_interval: Option<String>,
    pub poll_max_wait: Option<String>,
    pub session_timeout: Option<String>,
    pub fetch_max_bytes: Option<usize>,
    pub max_reconnects: Option<u32>,
}

impl VerifyConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        // surface bad durations at load time rather than at connect time
        config.engine_config()?;
        Ok(config)
    }

    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let e = &self.engine;
        let mut config = EngineConfig::default();
        apply(&mut config.preseed_deadline, &e.preseed_deadline, "preseed_deadline")?;
        apply(&mut config.commit_timeout, &e.commit_timeout, "commit_timeout")?;
        apply(&mut config.reconnect_backoff, &e.reconnect_backoff, "reconnect_backoff")?;
        apply(&mut config.scan_interval, &e.scan_interval, "scan_interval")?;
        apply(&mut config.poll_max_wait, &e.poll_max_wait, "poll_max_wait")?;
        apply(&mut config.session_timeout, &e.session_timeout, "session_timeout")?;
        if let Some(bytes) = e.fetch_max_bytes {
            config.fetch_max_bytes = bytes;
        }
        config.max_reconnects = e.max_reconnects;

        if config.scan_interval.is_zero() {
            anyhow::bail!("engine.scan_interval must be greater than zero");
        }
        Ok(config)
    }
}

fn apply(target: &mut Duration, value: &Option<String>, name: &str) -> anyhow::Result<()> {
    if let Some(text) = value {
        *target = parse_duration(text).with_context(|| format!("Invalid engine.{name}"))?;
    }
    Ok(())
}
