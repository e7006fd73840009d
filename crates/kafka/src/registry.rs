//! Process-owned registry of topic readers.
//!
//! At most one live, non-closing reader exists per `(topic, mode)`. A closing
//! reader is evicted before a replacement is created.

use crate::client::{ClientFactory, RdKafkaClientFactory};
use crate::config::{EngineConfig, KafkaProperties};
use crate::engine::ReaderError;
use crate::error::{Error, MatchError, Result};
use crate::reader::TopicReader;
use crate::schema::{HttpSchemaRegistry, NoSchemaRegistry, SchemaCache, SchemaSource};
use crate::signal::ReadySignal;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

/// Decode path of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicType {
    Avro,
    Json,
}

impl std::str::FromStr for TopicType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "avro" => Ok(Self::Avro),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidConfig(format!("unknown topic type: {other}"))),
        }
    }
}

/// Test readers close once their last bundle resolves; flow readers consume
/// until the flow topics are closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderMode {
    Test,
    Flow,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReaderKey {
    pub topic: String,
    pub mode: ReaderMode,
}

impl ReaderKey {
    pub fn new(topic: impl Into<String>, mode: ReaderMode) -> Self {
        Self {
            topic: topic.into(),
            mode,
        }
    }
}

impl fmt::Display for ReaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            ReaderMode::Test => write!(f, "{}[test]", self.topic),
            ReaderMode::Flow => write!(f, "{}[flow]", self.topic),
        }
    }
}

/// What a caller knows about a topic when asking for a reader.
#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub name: String,
    pub topic_type: TopicType,
    /// Consumer group to join; a prefixed random id when unset
    pub group_id: Option<String>,
}

impl TopicSpec {
    pub fn json(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic_type: TopicType::Json,
            group_id: None,
        }
    }

    pub fn avro(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic_type: TopicType::Avro,
            group_id: None,
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

/// Collaborators and settings shared by every reader of one registry.
pub(crate) struct Shared {
    pub(crate) factory: Arc<dyn ClientFactory>,
    pub(crate) schemas: Arc<SchemaCache>,
    pub(crate) properties: KafkaProperties,
    pub(crate) config: EngineConfig,
    pub(crate) flow_closed: AtomicBool,
    /// Every engine loop of one mode, including readers already replaced
    test_engines: TaskTracker,
    flow_engines: TaskTracker,
}

impl Shared {
    pub(crate) fn engines(&self, mode: ReaderMode) -> &TaskTracker {
        match mode {
            ReaderMode::Test => &self.test_engines,
            ReaderMode::Flow => &self.flow_engines,
        }
    }
}

pub(crate) struct RegistryInner {
    readers: RwLock<HashMap<ReaderKey, Arc<TopicReader>>>,
    shared: Arc<Shared>,
}

impl RegistryInner {
    /// Remove `reader` from the registry if it is still the one stored under `key`.
    pub(crate) fn evict(&self, key: &ReaderKey, reader: &TopicReader) {
        let mut readers = self.readers.write().unwrap_or_else(PoisonError::into_inner);
        if readers
            .get(key)
            .is_some_and(|r| std::ptr::eq(Arc::as_ptr(r), reader))
        {
            readers.remove(key);
            debug!("Evicted reader {key}");
        }
    }
}

/// Handle to a reader registry. Cloning shares the registry.
#[derive(Clone)]
pub struct RegistryService {
    inner: Arc<RegistryInner>,
}

impl RegistryService {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        schemas: Arc<dyn SchemaSource>,
        properties: KafkaProperties,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                readers: RwLock::new(HashMap::new()),
                shared: Arc::new(Shared {
                    factory,
                    schemas: Arc::new(SchemaCache::new(schemas)),
                    properties,
                    config,
                    flow_closed: AtomicBool::new(false),
                    test_engines: TaskTracker::new(),
                    flow_engines: TaskTracker::new(),
                }),
            }),
        }
    }

    /// Registry backed by rdkafka and, when configured, an HTTP schema registry.
    pub fn from_properties(properties: KafkaProperties, config: EngineConfig) -> Result<Self> {
        let factory = Arc::new(RdKafkaClientFactory::new(properties.clone(), config.clone()));
        let schemas: Arc<dyn SchemaSource> = match HttpSchemaRegistry::from_properties(&properties)? {
            Some(registry) => Arc::new(registry),
            None => Arc::new(NoSchemaRegistry),
        };
        Ok(Self::new(factory, schemas, properties, config))
    }

    pub fn properties(&self) -> &KafkaProperties {
        &self.inner.shared.properties
    }

    pub fn schemas(&self) -> &SchemaCache {
        &self.inner.shared.schemas
    }

    /// Return the live reader for `(topic, mode)`, creating it when allowed.
    ///
    /// A cached reader that is closing is evicted and replaced. Without
    /// `allow_create`, a missing reader is an error rather than an implicit
    /// subscription.
    pub fn get_or_create(
        &self,
        topic: &TopicSpec,
        mode: ReaderMode,
        allow_create: bool,
    ) -> Result<Arc<TopicReader>> {
        let key = ReaderKey::new(&topic.name, mode);
        if let Some(reader) = self.get(&key) {
            return Ok(reader);
        }
        if !allow_create {
            return Err(Error::UnregisteredReader(topic.name.clone()));
        }

        let mut readers = self
            .inner
            .readers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match readers.get(&key) {
            Some(existing) if !existing.is_closing() => return Ok(Arc::clone(existing)),
            Some(_) => {
                debug!("Replacing closing reader {key}");
                readers.remove(&key);
            }
            None => {}
        }

        let group_id = topic.group_id.clone().unwrap_or_else(|| {
            format!("{}{}", self.inner.shared.properties.group_prefix, Uuid::new_v4())
        });
        let client = self.inner.shared.factory.create(&topic.name, &group_id)?;
        let reader = Arc::new(TopicReader::new(
            key.clone(),
            topic.topic_type,
            group_id,
            client,
            Arc::clone(&self.inner.shared),
            Arc::downgrade(&self.inner),
        ));
        info!("Created reader {key} in group {}", reader.group_id());
        readers.insert(key, Arc::clone(&reader));
        Ok(reader)
    }

    pub fn new_reader(&self, topic: &TopicSpec, mode: ReaderMode) -> Result<Arc<TopicReader>> {
        self.get_or_create(topic, mode, true)
    }

    /// Create (or fetch) the test reader for `topic`.
    ///
    /// When `ready` is given, it is counted up by one and released once the
    /// reader's engine has all of its expectations registered.
    pub fn new_test_reader(
        &self,
        topic: &TopicSpec,
        ready: Option<&ReadySignal>,
    ) -> Result<Arc<TopicReader>> {
        let reader = self.get_or_create(topic, ReaderMode::Test, true)?;
        if let Some(ready) = ready {
            reader.attach_ready(ready.clone());
        }
        Ok(reader)
    }

    /// A live (non-closing) reader, if one is registered under `key`.
    pub fn get(&self, key: &ReaderKey) -> Option<Arc<TopicReader>> {
        let readers = self.inner.readers.read().unwrap_or_else(PoisonError::into_inner);
        readers.get(key).filter(|r| !r.is_closing()).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .readers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, filter: impl Fn(&ReaderKey) -> bool) -> Vec<Arc<TopicReader>> {
        let readers = self.inner.readers.read().unwrap_or_else(PoisonError::into_inner);
        readers
            .iter()
            .filter(|(key, _)| filter(key))
            .map(|(_, reader)| Arc::clone(reader))
            .collect()
    }

    /// Start the engine loop of every registered reader not already running.
    ///
    /// Fatal reader conditions are reported on `errors`, once per reader.
    /// Returns how many engines were started.
    pub fn start_all_engines(
        &self,
        errors: mpsc::UnboundedSender<ReaderError>,
        ready: Option<&ReadySignal>,
    ) -> usize {
        let mut started = 0;
        for reader in self.snapshot(|_| true) {
            if reader.start_engine(errors.clone(), ready.cloned()) {
                started += 1;
            }
        }
        debug!("Started {started} engines");
        started
    }

    /// Close every reader of `mode` and wait for their engines to exit.
    ///
    /// Readers that closed themselves, or were replaced while closing, are
    /// waited on as well.
    pub async fn close_all(&self, mode: ReaderMode) {
        if mode == ReaderMode::Flow {
            self.inner.shared.flow_closed.store(true, Ordering::SeqCst);
        }
        let readers = self.snapshot(|key| key.mode == mode);
        info!("Closing {} {mode:?} readers", readers.len());
        for reader in readers {
            reader.close().await;
        }

        let engines = self.inner.shared.engines(mode);
        engines.close();
        engines.wait().await;
        engines.reopen();
        debug!("All {mode:?} engines stopped");
    }

    /// Close the readers registered under `keys` and wait for their engines to exit.
    pub async fn close_specific(&self, keys: &[ReaderKey]) {
        let readers = self.snapshot(|key| keys.contains(key));
        for reader in readers {
            reader.close().await;
        }
    }

    /// Fail every pending bundle of every reader with a timeout error.
    pub async fn abort_all_tests(&self) -> usize {
        let mut aborted = 0;
        for reader in self.snapshot(|_| true) {
            for bundle in reader.live_bundles() {
                if bundle.complete(Err(MatchError::Aborted)) {
                    aborted += 1;
                }
                reader.delete_test(bundle).await;
            }
        }
        if aborted > 0 {
            info!("Aborted {aborted} pending tests");
        }
        aborted
    }
}
