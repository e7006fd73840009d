//! Per-reader engine loop.
//!
//! `AwaitingRegistration -> Polling -> {Reconnecting, Closed}`. Polling stops
//! when the reader is asked to close, a test reader runs out of bundles, a
//! flow reader sees the flow topics closed, or a fatal fetch error occurs.

use crate::classify::{classify, ErrorClass};
use crate::client::KafkaClient;
use crate::decode::decode_fields;
use crate::error::{Error, PollError};
use crate::matching::{compare_values, filter_by_key_map, find_by_key_index};
use crate::reader::TopicReader;
use crate::registry::{ReaderKey, ReaderMode};
use crate::signal::ReadySignal;
use futures::FutureExt;
use kafka_types::Record;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// A fatal reader condition, reported once per occurrence.
#[derive(Debug)]
pub struct ReaderError {
    pub key: ReaderKey,
    pub error: Error,
}

enum Step {
    Continue,
    Stop,
}

impl TopicReader {
    /// Spawn the engine loop. Returns `false` if it was already started.
    pub fn start_engine(
        self: &Arc<Self>,
        errors: mpsc::UnboundedSender<ReaderError>,
        ready: Option<ReadySignal>,
    ) -> bool {
        if self.engine_started.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(ready) = ready {
            self.attach_ready(ready);
        }
        self.ensure_scanner();
        let engines = self.shared.engines(self.key.mode);
        self.engine_running
            .spawn(engines.track_future(Arc::clone(self).run_engine(errors)));
        true
    }

    async fn run_engine(self: Arc<Self>, errors: mpsc::UnboundedSender<ReaderError>) {
        let Some(mut client) = self.client.lock().await.take() else {
            warn!("Engine for {} started without a client", self.key);
            self.fire_ready();
            self.mark_closed();
            return;
        };

        tokio::select! {
            _ = self.registration_complete() => {}
            _ = self.cancel.cancelled() => {}
        }
        self.fire_ready();
        info!(
            "Engine for {} polling with {} pending tests",
            self.key,
            self.count_test()
        );

        let seeded = std::mem::take(
            &mut *self.seeded.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for record in seeded {
            self.dispatch(record);
        }

        while !self.should_stop() {
            let fetches = tokio::select! {
                fetches = client.poll_fetches(self.shared.config.poll_max_wait) => fetches,
                _ = self.cancel.cancelled() => break,
            };

            if !fetches.records.is_empty() {
                self.commit_first(&mut client).await;
                for record in fetches.records {
                    if self.is_closing() {
                        break;
                    }
                    self.dispatch(record);
                }
            }

            if let Some(err) = fetches.error {
                match self.handle_poll_error(err, &mut client, &errors).await {
                    Step::Continue => continue,
                    Step::Stop => break,
                }
            }
        }

        self.shutdown_client(&mut client);
        self.mark_closed();
        info!("Engine for {} stopped", self.key);
    }

    fn should_stop(&self) -> bool {
        if self.is_closing() {
            return true;
        }
        match self.key.mode {
            ReaderMode::Test => self.count_test() == 0,
            ReaderMode::Flow => self.shared.flow_closed.load(Ordering::SeqCst),
        }
    }

    /// Lock in the starting offset once per client. Failure is logged only:
    /// a missed commit just means re-reading a few records after a restart.
    async fn commit_first(&self, client: &mut Box<dyn KafkaClient>) {
        if self.first_record_committed.swap(true, Ordering::SeqCst) {
            return;
        }
        match client.commit(self.shared.config.commit_timeout).await {
            Ok(()) => debug!("Committed initial offset for {}", self.key),
            Err(e) => warn!("Initial commit for {} failed: {e}", self.key),
        }
    }

    async fn handle_poll_error(
        &self,
        err: PollError,
        client: &mut Box<dyn KafkaClient>,
        errors: &mpsc::UnboundedSender<ReaderError>,
    ) -> Step {
        let class = classify(&err);
        match class {
            ErrorClass::Auth | ErrorClass::Unrecoverable => {
                error!("Fatal {class:?} error on {}: {err}", self.key);
                self.report(errors, Error::Poll(err));
                Step::Stop
            }
            ErrorClass::ClientClosed => {
                if !self.is_closing() {
                    error!("Client for {} closed unexpectedly", self.key);
                    self.report(errors, Error::Poll(err));
                }
                Step::Stop
            }
            ErrorClass::Canceled => {
                if self.is_closing() {
                    Step::Stop
                } else {
                    Step::Continue
                }
            }
            ErrorClass::Transient => {
                if self.is_closing() {
                    return Step::Stop;
                }
                warn!("Transient error on {}, reconnecting: {err}", self.key);
                if let Err(e) = self.recreate_client(client) {
                    error!("Reconnect of {} failed: {e}", self.key);
                    self.report(errors, e);
                    return Step::Stop;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.shared.config.reconnect_backoff) => Step::Continue,
                    _ = self.cancel.cancelled() => Step::Stop,
                }
            }
            ErrorClass::Other => {
                warn!("Retrying after error on {}: {err}", self.key);
                Step::Continue
            }
        }
    }

    fn report(&self, errors: &mpsc::UnboundedSender<ReaderError>, error: Error) {
        let report = ReaderError {
            key: self.key.clone(),
            error,
        };
        if errors.send(report).is_err() {
            debug!("Error receiver for {} is gone", self.key);
        }
    }

    /// Replace the client with a fresh one in the same consumer group.
    pub(crate) fn recreate_client(
        &self,
        client: &mut Box<dyn KafkaClient>,
    ) -> crate::error::Result<()> {
        let attempt = self.reconnects.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.shared.config.max_reconnects {
            if attempt > max {
                return Err(Error::Reconnect {
                    key: self.key.clone(),
                    reason: format!("gave up after {max} reconnects"),
                });
            }
        }

        self.shutdown_client(client);
        let fresh = self
            .shared
            .factory
            .create(&self.key.topic, self.group_id())
            .map_err(|e| Error::Reconnect {
                key: self.key.clone(),
                reason: e.to_string(),
            })?;
        *client = fresh;
        self.first_record_committed.store(false, Ordering::SeqCst);
        info!("Recreated client for {} (attempt {attempt})", self.key);
        Ok(())
    }

    /// Match one record on its own task, isolating panics.
    fn dispatch(self: &Arc<Self>, record: Record) {
        let reader = Arc::clone(self);
        self.engine_running.spawn(async move {
            let key = reader.key.clone();
            let offset = record.offset;
            if AssertUnwindSafe(reader.process_message(record))
                .catch_unwind()
                .await
                .is_err()
            {
                error!("Recovered from panic while matching {key} offset {offset}");
            }
        });
    }

    /// Run one record through the key filter, identification and comparison.
    pub(crate) async fn process_message(self: Arc<Self>, record: Record) {
        let schemas = &self.shared.schemas;
        let key = match decode_fields(record.key_bytes(), self.topic_type, schemas).await {
            Ok(key) => key,
            Err(e) => {
                debug!("Skipping {} offset {}: undecodable key: {e}", self.key, record.offset);
                return;
            }
        };

        let bundles = self.live_bundles();
        if !filter_by_key_map(&bundles, &key) {
            trace!("No bundle on {} wants offset {}", self.key, record.offset);
            return;
        }

        let mut value = match decode_fields(record.value_bytes(), self.topic_type, schemas).await {
            Ok(value) => value,
            Err(e) => {
                debug!("Skipping {} offset {}: undecodable value: {e}", self.key, record.offset);
                return;
            }
        };

        let Some(bundle) = find_by_key_index(&bundles, &key, &mut value) else {
            trace!("Offset {} on {} matched no logical key", record.offset, self.key);
            return;
        };

        let result = compare_values(&bundle, &value, &self.key.topic);
        match &result {
            Ok(()) => info!("Test {} passed on {}", bundle.name, self.key),
            Err(e) => warn!("Test {} failed on {}: {e}", bundle.name, self.key),
        }
        if bundle.complete(result) {
            self.delete_test(bundle).await;
        }
    }
}
