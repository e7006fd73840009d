//! Client abstraction and the rdkafka implementation.
//!
//! Engine loops only see [`KafkaClient`], which keeps the loop testable
//! without a broker.

use crate::config::{EngineConfig, KafkaProperties};
use crate::error::{Error, PollError, Result};
use async_trait::async_trait;
use chrono::DateTime;
use kafka_types::Record;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as RdkafkaConsumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message as RdkafkaMessage};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound of records drained into one [`Fetches`] batch
const MAX_BATCH: usize = 500;

/// Result of one poll: the records fetched and, independently, a fetch-level
/// error. Records are dispatched before the error is looked at.
#[derive(Debug, Default)]
pub struct Fetches {
    pub records: Vec<Record>,
    pub error: Option<PollError>,
}

impl Fetches {
    pub fn records(records: Vec<Record>) -> Self {
        Self {
            records,
            error: None,
        }
    }

    pub fn error(error: PollError) -> Self {
        Self {
            records: Vec::new(),
            error: Some(error),
        }
    }
}

/// One consumer-group member bound to one topic.
///
/// Owned exclusively by a reader's engine loop.
#[async_trait]
pub trait KafkaClient: Send {
    /// Fetch whatever is available, waiting at most `max_wait`.
    async fn poll_fetches(&mut self, max_wait: Duration) -> Fetches;

    /// Synchronously commit the consumed position.
    async fn commit(&mut self, timeout: Duration) -> Result<()>;

    fn leave_group(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Builds clients. Recreation after a transient failure goes through the same
/// factory with the same group id.
pub trait ClientFactory: Send + Sync {
    fn create(&self, topic: &str, group_id: &str) -> Result<Box<dyn KafkaClient>>;
}

/// rdkafka-backed [`ClientFactory`].
pub struct RdKafkaClientFactory {
    properties: KafkaProperties,
    config: EngineConfig,
}

impl RdKafkaClientFactory {
    pub fn new(properties: KafkaProperties, config: EngineConfig) -> Self {
        Self { properties, config }
    }

    fn client_config(&self, group_id: &str) -> ClientConfig {
        let session_ms = self.config.session_timeout.as_millis();
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.properties.bootstrap_servers)
            .set("group.id", group_id)
            // only new messages: assertions are about effects of actions just taken
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", session_ms.to_string())
            .set("max.poll.interval.ms", session_ms.max(300_000).to_string())
            .set("fetch.max.bytes", self.config.fetch_max_bytes.to_string())
            .set(
                "fetch.wait.max.ms",
                self.config.poll_max_wait.as_millis().to_string(),
            )
            .set("isolation.level", "read_uncommitted")
            .set("enable.partition.eof", "false");

        let tls = self.properties.ca_cert_path.is_some() || self.properties.sasl_credentials().is_some();
        if let Some((user, pass)) = self.properties.sasl_credentials() {
            cfg.set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", user)
                .set("sasl.password", pass);
        } else if tls {
            cfg.set("security.protocol", "SSL");
        }
        if let Some(ca) = &self.properties.ca_cert_path {
            cfg.set("ssl.ca.location", ca.to_string_lossy());
        }
        if tls && self.properties.relax_tls() {
            cfg.set("enable.ssl.certificate.verification", "false");
        }
        cfg
    }
}

impl ClientFactory for RdKafkaClientFactory {
    fn create(&self, topic: &str, group_id: &str) -> Result<Box<dyn KafkaClient>> {
        let consumer: StreamConsumer = self
            .client_config(group_id)
            .create()
            .map_err(|e| Error::ClientCreation(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| Error::ClientCreation(format!("Failed to subscribe to topic: {e}")))?;

        debug!("Created consumer for topic {topic} in group {group_id}");
        Ok(Box::new(RdKafkaClient {
            consumer: Some(Arc::new(consumer)),
        }))
    }
}

/// [`KafkaClient`] over an rdkafka [`StreamConsumer`].
pub struct RdKafkaClient {
    consumer: Option<Arc<StreamConsumer>>,
}

#[async_trait]
impl KafkaClient for RdKafkaClient {
    async fn poll_fetches(&mut self, max_wait: Duration) -> Fetches {
        let Some(consumer) = &self.consumer else {
            return Fetches::error(PollError::ClientClosed);
        };

        // Fetch at least one message
        let mut records = match tokio::time::timeout(max_wait, consumer.recv()).await {
            Ok(Ok(msg)) => vec![to_record(&msg)],
            Ok(Err(e)) => return Fetches::error(PollError::Kafka(e)),
            Err(_) => return Fetches::error(PollError::DeadlineExceeded),
        };

        // Drain whatever else is already buffered
        while records.len() < MAX_BATCH {
            match tokio::time::timeout(Duration::from_millis(10), consumer.recv()).await {
                Ok(Ok(msg)) => records.push(to_record(&msg)),
                Ok(Err(e)) => {
                    return Fetches {
                        records,
                        error: Some(PollError::Kafka(e)),
                    }
                }
                Err(_) => break,
            }
        }

        Fetches::records(records)
    }

    async fn commit(&mut self, timeout: Duration) -> Result<()> {
        let consumer = self
            .consumer
            .clone()
            .ok_or(Error::Poll(PollError::ClientClosed))?;
        let commit =
            tokio::task::spawn_blocking(move || consumer.commit_consumer_state(CommitMode::Sync));
        match tokio::time::timeout(timeout, commit).await {
            Ok(Ok(result)) => result.map_err(Error::from),
            Ok(Err(join)) => Err(Error::Poll(PollError::Other(join.to_string()))),
            Err(_) => Err(Error::Poll(PollError::DeadlineExceeded)),
        }
    }

    fn leave_group(&mut self) -> Result<()> {
        if let Some(consumer) = &self.consumer {
            consumer.unsubscribe();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // dropping the last handle closes the rdkafka consumer
        self.consumer.take();
        Ok(())
    }
}

fn to_record(msg: &BorrowedMessage<'_>) -> Record {
    Record {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(|k| k.to_vec()),
        value: msg.payload().map(|v| v.to_vec()),
        timestamp: msg
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis),
    }
}
