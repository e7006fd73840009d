//! In-memory Kafka client driven by a per-topic script.

use async_trait::async_trait;
use kafka_verify::engine::{ClientFactory, Fetches, KafkaClient, PollError};
use kafka_verify::Record;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted poll result.
pub enum Step {
    Records(Vec<Record>),
    Error(PollError),
}

type Scripts = Arc<Mutex<HashMap<String, VecDeque<Step>>>>;

#[derive(Default)]
pub struct MockFactory {
    scripts: Scripts,
    creates: AtomicUsize,
    commits: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    close_delay: Mutex<Option<Duration>>,
    group_ids: Mutex<Vec<String>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a poll result for `topic`. Clients created later (reconnects)
    /// continue from where the previous client stopped.
    pub fn push(&self, topic: &str, step: Step) {
        self.scripts
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push_back(step);
    }

    /// Make every client created from now on block this long in `close()`.
    pub fn slow_close(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = Some(delay);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn group_ids(&self) -> Vec<String> {
        self.group_ids.lock().unwrap().clone()
    }
}

impl ClientFactory for MockFactory {
    fn create(&self, topic: &str, group_id: &str) -> kafka_verify::engine::Result<Box<dyn KafkaClient>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.group_ids.lock().unwrap().push(group_id.to_string());
        Ok(Box::new(MockClient {
            topic: topic.to_string(),
            scripts: Arc::clone(&self.scripts),
            commits: Arc::clone(&self.commits),
            closes: Arc::clone(&self.closes),
            close_delay: *self.close_delay.lock().unwrap(),
            closed: false,
        }))
    }
}

pub struct MockClient {
    topic: String,
    scripts: Scripts,
    commits: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    close_delay: Option<Duration>,
    closed: bool,
}

#[async_trait]
impl KafkaClient for MockClient {
    async fn poll_fetches(&mut self, max_wait: Duration) -> Fetches {
        if self.closed {
            return Fetches::error(PollError::ClientClosed);
        }
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&self.topic)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Step::Records(records)) => Fetches::records(records),
            Some(Step::Error(e)) => Fetches::error(e),
            None => {
                tokio::time::sleep(max_wait).await;
                Fetches::error(PollError::DeadlineExceeded)
            }
        }
    }

    async fn commit(&mut self, _timeout: Duration) -> kafka_verify::engine::Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn leave_group(&mut self) -> kafka_verify::engine::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> kafka_verify::engine::Result<()> {
        if !self.closed {
            if let Some(delay) = self.close_delay {
                std::thread::sleep(delay);
            }
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
