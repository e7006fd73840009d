//! Engine tests
//!
//! Drive the full engine (registry, readers, map writer, engine loop and
//! matching) against a scripted in-memory client, so no broker is needed.

mod end_to_end;
mod errors;
mod mock;
mod payload;

use kafka_verify::engine::{NoSchemaRegistry, SchemaSource};
use kafka_verify::{EngineConfig, KafkaProperties, RegistryService};
use mock::MockFactory;
use std::sync::Arc;
use std::time::Duration;

/// Engine timings shrunk so scenarios finish in milliseconds.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        preseed_deadline: Duration::from_millis(300),
        commit_timeout: Duration::from_millis(100),
        reconnect_backoff: Duration::from_millis(50),
        scan_interval: Duration::from_millis(20),
        poll_max_wait: Duration::from_millis(20),
        ..EngineConfig::default()
    }
}

pub fn registry(factory: &Arc<MockFactory>) -> RegistryService {
    registry_with(factory, Arc::new(NoSchemaRegistry), fast_config())
}

pub fn registry_with(
    factory: &Arc<MockFactory>,
    schemas: Arc<dyn SchemaSource>,
    config: EngineConfig,
) -> RegistryService {
    kafka_verify::init_tracing("kafka_verify_engine=debug");
    RegistryService::new(
        factory.clone(),
        schemas,
        KafkaProperties::default(),
        config,
    )
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await a future, failing the test after five seconds.
pub async fn within<F: std::future::Future>(what: &str, future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for: {what}"))
}
