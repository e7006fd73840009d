use std::sync::Arc;
use tokio::sync::watch;

/// Count-down readiness barrier.
///
/// Created with the number of parties expected to report ready; `wait`
/// resolves once each of them has called `done`. Cloning shares the count.
#[derive(Clone, Debug)]
pub struct ReadySignal {
    remaining: Arc<watch::Sender<usize>>,
}

impl ReadySignal {
    pub fn new(count: usize) -> Self {
        let (tx, _rx) = watch::channel(count);
        Self {
            remaining: Arc::new(tx),
        }
    }

    /// Register one more party.
    pub fn add(&self, n: usize) {
        self.remaining.send_modify(|c| *c += n);
    }

    /// Report one party ready. Extra calls are ignored.
    pub fn done(&self) {
        self.remaining.send_modify(|c| *c = c.saturating_sub(1));
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    pub fn is_released(&self) -> bool {
        self.remaining() == 0
    }

    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|c| *c == 0).await;
    }
}
