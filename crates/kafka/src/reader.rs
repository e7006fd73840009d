//! Topic reader: one consumer client plus the pending bundles of one topic.
//!
//! The bundle map is written by a single task, [`TopicReader::scan_tests`],
//! which drains the `incoming` and `delete` channels. Every other caller only
//! enqueues. The one direct write is the placeholder inserted by
//! [`TopicReader::register_test`].

use crate::bundle::TestBundle;
use crate::classify::{classify, ErrorClass};
use crate::client::KafkaClient;
use crate::error::{Error, MatchError, Result};
use crate::registry::{ReaderKey, ReaderMode, RegistryInner, Shared, TopicType};
use crate::signal::ReadySignal;
use chrono::{DateTime, Utc};
use kafka_types::Record;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

/// Bundles allowed in flight toward registration
const INCOMING_CAPACITY: usize = 3;
const DELETE_CAPACITY: usize = 20;

type BundleMap = HashMap<String, Option<Arc<TestBundle>>>;
type ScanChannels = (
    mpsc::Receiver<Arc<TestBundle>>,
    mpsc::Receiver<Arc<TestBundle>>,
);

pub struct TopicReader {
    pub(crate) key: ReaderKey,
    pub(crate) topic_type: TopicType,
    group_id: String,
    bundles: RwLock<BundleMap>,
    incoming_tx: mpsc::Sender<Arc<TestBundle>>,
    delete_tx: mpsc::Sender<Arc<TestBundle>>,
    scan_rx: Mutex<Option<ScanChannels>>,
    /// true while no placeholder is waiting for its bundle
    registration_complete: watch::Sender<bool>,
    /// Present until the engine loop takes ownership
    pub(crate) client: tokio::sync::Mutex<Option<Box<dyn KafkaClient>>>,
    pub(crate) seeded: Mutex<Vec<Record>>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) first_record_committed: AtomicBool,
    pub(crate) reconnects: AtomicU32,
    pub(crate) engine_started: AtomicBool,
    pub(crate) engine_ready: Mutex<Vec<ReadySignal>>,
    closing: AtomicBool,
    closed: AtomicBool,
    pub(crate) cancel: CancellationToken,
    /// Held by the engine loop, the map writer and every matching task
    pub(crate) engine_running: TaskTracker,
    pub(crate) shared: Arc<Shared>,
    registry: Weak<RegistryInner>,
}

impl TopicReader {
    pub(crate) fn new(
        key: ReaderKey,
        topic_type: TopicType,
        group_id: String,
        client: Box<dyn KafkaClient>,
        shared: Arc<Shared>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        let (delete_tx, delete_rx) = mpsc::channel(DELETE_CAPACITY);
        let (registration_complete, _) = watch::channel(true);
        Self {
            key,
            topic_type,
            group_id,
            bundles: RwLock::new(HashMap::new()),
            incoming_tx,
            delete_tx,
            scan_rx: Mutex::new(Some((incoming_rx, delete_rx))),
            registration_complete,
            client: tokio::sync::Mutex::new(Some(client)),
            seeded: Mutex::new(Vec::new()),
            started_at: Utc::now(),
            first_record_committed: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
            engine_started: AtomicBool::new(false),
            engine_ready: Mutex::new(Vec::new()),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            engine_running: TaskTracker::new(),
            shared,
            registry,
        }
    }

    pub fn key(&self) -> &ReaderKey {
        &self.key
    }

    pub fn topic(&self) -> &str {
        &self.key.topic
    }

    pub fn mode(&self) -> ReaderMode {
        self.key.mode
    }

    pub fn topic_type(&self) -> TopicType {
        self.topic_type
    }

    /// Stable across reconnects.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Whether the engine loop has exited and released the client.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn read_bundles(&self) -> std::sync::RwLockReadGuard<'_, BundleMap> {
        self.bundles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_bundles(&self) -> std::sync::RwLockWriteGuard<'_, BundleMap> {
        self.bundles.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `name` with an empty placeholder.
    ///
    /// The engine will not start polling until every placeholder has been
    /// filled through [`TopicReader::test_expected`].
    pub fn register_test(&self, name: &str) {
        let mut bundles = self.write_bundles();
        bundles.insert(name.to_string(), None);
        // published under the lock so a concurrent refresh cannot overwrite it
        self.registration_complete.send_replace(false);
        drop(bundles);
        debug!("Registered test {name} on {}", self.key);
    }

    /// Number of registered tests, placeholders included.
    pub fn count_test(&self) -> usize {
        self.read_bundles().len()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read_bundles().contains_key(name)
    }

    /// Snapshot of the filled-in bundles.
    pub fn live_bundles(&self) -> Vec<Arc<TestBundle>> {
        self.read_bundles().values().flatten().cloned().collect()
    }

    /// Submit the expectations of a registered test.
    ///
    /// The returned handle can be waited on. A bundle whose name was never
    /// registered, or that arrives after the reader closed, is failed through
    /// its callback straight away.
    pub async fn test_expected(self: &Arc<Self>, mut bundle: TestBundle) -> Arc<TestBundle> {
        bundle.normalize();
        let bundle = Arc::new(bundle);

        if !self.is_registered(&bundle.name) {
            warn!("Test {} is not registered on {}", bundle.name, self.key);
            bundle.complete(Err(MatchError::UnregisteredTest(bundle.name.clone())));
            return bundle;
        }
        if self.is_closing() {
            bundle.complete(Err(MatchError::Setup(format!("reader {} is closed", self.key))));
            return bundle;
        }

        self.ensure_scanner();
        if self.incoming_tx.send(Arc::clone(&bundle)).await.is_err() {
            bundle.complete(Err(MatchError::Setup(format!("reader {} is closed", self.key))));
        }
        bundle
    }

    /// Enqueue removal of `bundle`. Only the exact instance is removed, never
    /// a newer bundle registered under the same name.
    pub async fn delete_test(self: &Arc<Self>, bundle: Arc<TestBundle>) {
        self.ensure_scanner();
        if self.delete_tx.send(bundle).await.is_err() {
            trace!("Delete on {} after its map writer stopped", self.key);
        }
    }

    /// Spawn the map writer on first use.
    pub(crate) fn ensure_scanner(self: &Arc<Self>) {
        let channels = self
            .scan_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((incoming, delete)) = channels {
            self.engine_running
                .spawn(Arc::clone(self).scan_tests(incoming, delete));
        }
    }

    /// The only task that mutates the bundle map after registration.
    async fn scan_tests(
        self: Arc<Self>,
        mut incoming: mpsc::Receiver<Arc<TestBundle>>,
        mut delete: mpsc::Receiver<Arc<TestBundle>>,
    ) {
        let mut tick = tokio::time::interval(self.shared.config.scan_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(bundle) = delete.recv() => self.remove_bundle(&bundle),
                Some(bundle) = incoming.recv() => self.insert_bundle(bundle),
                _ = tick.tick() => {}
                _ = self.cancel.cancelled() => break,
            }
            self.refresh_registration();
        }

        // release anyone waiting on registration of a reader that went away
        self.registration_complete.send_replace(true);
        debug!("Map writer for {} stopped", self.key);
    }

    fn insert_bundle(&self, bundle: Arc<TestBundle>) {
        let name = bundle.name.clone();
        let previous = self.write_bundles().insert(name.clone(), Some(bundle));
        if let Some(Some(_)) = previous {
            debug!("Replaced bundle {name} on {}", self.key);
        } else {
            trace!("Filled bundle {name} on {}", self.key);
        }
    }

    fn remove_bundle(&self, bundle: &Arc<TestBundle>) {
        let now_empty = {
            let mut bundles = self.write_bundles();
            let is_same = matches!(
                bundles.get(&bundle.name),
                Some(Some(current)) if Arc::ptr_eq(current, bundle)
            );
            if !is_same {
                return;
            }
            bundles.remove(&bundle.name);
            bundles.is_empty()
        };
        debug!("Deleted bundle {} from {}", bundle.name, self.key);

        if now_empty && self.key.mode == ReaderMode::Test {
            info!("No pending tests left on {}, closing", self.key);
            self.request_close();
        }
    }

    fn refresh_registration(&self) {
        let bundles = self.read_bundles();
        let complete = !bundles.values().any(Option::is_none);
        self.registration_complete.send_if_modified(|current| {
            let changed = *current != complete;
            *current = complete;
            changed
        });
    }

    /// Resolves once no placeholder is waiting for its bundle.
    pub(crate) async fn registration_complete(&self) {
        let mut rx = self.registration_complete.subscribe();
        let _ = rx.wait_for(|complete| *complete).await;
    }

    /// Count `ready` up by one; it is released when this reader's engine
    /// finishes waiting for registration.
    pub(crate) fn attach_ready(&self, ready: ReadySignal) {
        ready.add(1);
        self.engine_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ready);
    }

    pub(crate) fn fire_ready(&self) {
        let signals = std::mem::take(
            &mut *self
                .engine_ready
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for signal in signals {
            signal.done();
        }
    }

    /// Catch up to "now" before any matching happens.
    ///
    /// Records produced before this reader was created are discarded. Returns
    /// once the first current record arrives (it is kept for the engine) or
    /// the deadline passes.
    pub async fn pre_seed(&self) -> Result<()> {
        let mut slot = self.client.lock().await;
        let Some(client) = slot.as_mut() else {
            return Err(Error::ReaderClosed(self.key.clone()));
        };

        let deadline = tokio::time::Instant::now() + self.shared.config.preseed_deadline;
        let mut discarded = 0usize;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                debug!("Pre-seed of {} hit its deadline after discarding {discarded} records", self.key);
                return Ok(());
            }

            let fetches = client
                .poll_fetches(remaining.min(self.shared.config.poll_max_wait))
                .await;
            let total = fetches.records.len();
            let current: Vec<Record> = fetches
                .records
                .into_iter()
                .filter(|r| !r.is_before(self.started_at))
                .collect();
            discarded += total - current.len();
            if !current.is_empty() {
                debug!("Pre-seed of {} caught up, kept {} records", self.key, current.len());
                self.seeded
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(current);
                return Ok(());
            }

            if let Some(err) = fetches.error {
                match classify(&err) {
                    class if class.is_fatal() => return Err(Error::Poll(err)),
                    ErrorClass::Transient => {
                        warn!("Transient error during pre-seed of {}, reconnecting: {err}", self.key);
                        self.recreate_client(client)?;
                        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
                        tokio::time::sleep(self.shared.config.reconnect_backoff.min(left)).await;
                    }
                    class => trace!("Pre-seed of {} ignoring {class:?} error: {err}", self.key),
                }
            }
        }
    }

    /// Ask the reader to stop. Returns immediately; the engine exits on its
    /// next turn. The reader stays registered, hidden from lookups, until its
    /// client has been shut down so that global shutdown still waits for it.
    pub fn request_close(&self) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            debug!("Close requested for {}", self.key);
        }
        self.cancel.cancel();
    }

    /// Close the reader and wait until its engine loop and matching tasks exit.
    pub async fn close(&self) {
        self.request_close();
        self.engine_running.close();
        self.engine_running.wait().await;

        // never started: the client is still parked here
        let client = self.client.lock().await.take();
        if let Some(mut client) = client {
            self.shutdown_client(&mut client);
        }
        self.fire_ready();
        self.mark_closed();
    }

    /// Called once the client is released. Eviction happens before the closed
    /// flag is raised.
    pub(crate) fn mark_closed(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        self.evict();
        self.closed.store(true, Ordering::SeqCst);
    }

    fn evict(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.evict(&self.key, self);
        }
    }

    /// Leave the group and close, logging rather than propagating failures.
    pub(crate) fn shutdown_client(&self, client: &mut Box<dyn KafkaClient>) {
        let key = &self.key;
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            if let Err(e) = client.leave_group() {
                warn!("Failed to leave group for {key}: {e}");
            }
            client.close()
        })) {
            Ok(Ok(())) => debug!("Closed client for {key}"),
            Ok(Err(e)) => warn!("Failed to close client for {key}: {e}"),
            Err(_) => warn!("Recovered from panic while closing client for {key}"),
        }
    }
}

impl std::fmt::Debug for TopicReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicReader")
            .field("key", &self.key)
            .field("topic_type", &self.topic_type)
            .field("group_id", &self.group_id)
            .field("pending", &self.count_test())
            .field("closing", &self.is_closing())
            .finish()
    }
}
