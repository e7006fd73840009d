//! Test bundles: one pending expectation about a future record.

use crate::error::MatchError;
use kafka_types::ExpectedValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

pub type CompletionCallback = Box<dyn FnOnce(Result<(), MatchError>) + Send>;

pub type Outcome = Result<(), MatchError>;

pub struct TestBundle {
    /// Unique within a reader, usually the originating test's name
    pub name: String,
    /// Label broadcast to the state tracker on success
    pub completion_status: String,
    /// Business-key fields, compared as 32-bit integers
    pub expected_key: HashMap<String, String>,
    /// Identification fields of the value; keys may be dotted (`Outer.Inner`)
    pub expected_logical_key: HashMap<String, String>,
    pub expected_value: HashMap<String, ExpectedValue>,
    callback: Mutex<Option<CompletionCallback>>,
    completed: AtomicBool,
    outcome: watch::Sender<Option<Outcome>>,
}

impl TestBundle {
    pub fn new(name: impl Into<String>) -> Self {
        let (outcome, _rx) = watch::channel(None);
        Self {
            name: name.into(),
            completion_status: String::new(),
            expected_key: HashMap::new(),
            expected_logical_key: HashMap::new(),
            expected_value: HashMap::new(),
            callback: Mutex::new(None),
            completed: AtomicBool::new(false),
            outcome,
        }
    }

    pub fn completion_status(mut self, status: impl Into<String>) -> Self {
        self.completion_status = status.into();
        self
    }

    pub fn expect_key(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.expected_key.insert(field.into(), value.into());
        self
    }

    pub fn expect_logical_key(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.expected_logical_key.insert(path.into(), value.into());
        self
    }

    pub fn expect_value(mut self, field: impl Into<String>, value: impl Into<ExpectedValue>) -> Self {
        self.expected_value.insert(field.into(), value.into());
        self
    }

    pub fn on_complete<F>(self, callback: F) -> Self
    where
        F: FnOnce(Result<(), MatchError>) + Send + 'static,
    {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
        self
    }

    /// Trim surrounding whitespace from logical-key values and string expectations.
    pub(crate) fn normalize(&mut self) {
        for value in self.expected_logical_key.values_mut() {
            *value = value.trim().to_string();
        }
        for value in self.expected_value.values_mut() {
            *value = value.trimmed();
        }
    }

    /// Fire the completion callback and release waiters.
    ///
    /// Only the first call has any effect; later calls return `false`.
    pub fn complete(&self, result: Outcome) -> bool {
        if self.completed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(result.clone());
        }
        self.outcome.send_replace(Some(result));
        true
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Block until the bundle has completed, returning its outcome.
    pub async fn wait(&self) -> Outcome {
        let mut rx = self.outcome.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
            Err(_) => Err(MatchError::Aborted),
        };
        outcome
    }
}

impl fmt::Debug for TestBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestBundle")
            .field("name", &self.name)
            .field("completion_status", &self.completion_status)
            .field("expected_key", &self.expected_key)
            .field("expected_logical_key", &self.expected_logical_key)
            .field("expected_value", &self.expected_value)
            .field("completed", &self.is_completed())
            .finish()
    }
}
