//! Kafka verification engine.
//!
//! Consumes topics and resolves test bundles (expectations about records
//! that are about to be produced) as matching records arrive.
//!
//! Features:
//!
//! - Reader registry: at most one live reader per topic and mode
//! - Single-writer bundle maps fed through bounded channels
//! - Avro (schema registry) and JSON decoding behind one matching algorithm
//! - Ordered fetch-error classification with reconnects on transient failures

pub mod bundle;
pub mod classify;
pub mod client;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod matching;
pub mod reader;
pub mod registry;
pub mod schema;
pub mod sequence;
pub mod signal;

// Re-export main types for easy access
pub use bundle::{CompletionCallback, Outcome, TestBundle};
pub use classify::{classify, ErrorClass};
pub use client::{ClientFactory, Fetches, KafkaClient, RdKafkaClient, RdKafkaClientFactory};
pub use config::{EngineConfig, KafkaProperties};
pub use engine::ReaderError;
pub use error::{Error, MatchError, PollError, Result};
pub use reader::TopicReader;
pub use registry::{ReaderKey, ReaderMode, RegistryService, TopicSpec, TopicType};
pub use schema::{CachedSchema, HttpSchemaRegistry, NoSchemaRegistry, SchemaCache, SchemaSource};
pub use sequence::{test_sequence_expected, test_wait, NoProgress, ProgressSink, StateTracker};
pub use signal::ReadySignal;
