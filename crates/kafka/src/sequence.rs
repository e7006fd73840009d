//! Helpers that drive a sequence of expectations across several readers.

use crate::bundle::TestBundle;
use crate::error::{Error, MatchError, Result};
use crate::reader::TopicReader;
use crate::signal::ReadySignal;
use std::sync::Arc;
use tracing::{debug, info};

/// Progress reporting sink (a progress bar, a counter, ...).
pub trait ProgressSink: Send + Sync {
    fn increment(&self, n: u64);
    fn abort(&self);
}

/// Receives the completion status of each passed bundle.
pub trait StateTracker: Send + Sync {
    fn broadcast(&self, status: &str);
}

/// Sink and tracker that ignore everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn increment(&self, _n: u64) {}
    fn abort(&self) {}
}

impl StateTracker for NoProgress {
    fn broadcast(&self, _status: &str) {}
}

/// Submit `bundles[i]` to `readers[i]` and wait until every engine counted
/// on `ready` has its expectations registered.
pub async fn test_sequence_expected(
    id: &str,
    readers: &[Arc<TopicReader>],
    bundles: Vec<TestBundle>,
    ready: &ReadySignal,
) -> Result<Vec<Arc<TestBundle>>> {
    if readers.len() != bundles.len() {
        return Err(Error::InvalidConfig(format!(
            "sequence {id}: {} readers for {} expectations",
            readers.len(),
            bundles.len()
        )));
    }

    let mut handles = Vec::with_capacity(bundles.len());
    for (reader, bundle) in readers.iter().zip(bundles) {
        debug!("Sequence {id}: submitting {} to {}", bundle.name, reader.key());
        handles.push(reader.test_expected(bundle).await);
    }

    ready.wait().await;
    info!("Sequence {id}: {} expectations registered", handles.len());
    Ok(handles)
}

/// Wait for each bundle in order.
///
/// Each pass broadcasts the bundle's completion status and advances the
/// progress sink; the first failure aborts the sink and is returned.
pub async fn test_wait(
    bundles: &[Arc<TestBundle>],
    progress: &dyn ProgressSink,
    state: &dyn StateTracker,
) -> std::result::Result<(), MatchError> {
    for bundle in bundles {
        if let Err(e) = bundle.wait().await {
            progress.abort();
            return Err(e);
        }
        if !bundle.completion_status.is_empty() {
            state.broadcast(&bundle.completion_status);
        }
        progress.increment(1);
    }
    Ok(())
}
