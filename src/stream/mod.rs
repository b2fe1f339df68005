//! Live output listeners keyed by run id.
//!
//! The sandbox publishes every output line under the run id that issued the
//! command. At most one subscriber may listen to a run; dropping the
//! [`Subscription`] deregisters it. Publishing to a run nobody listens to is
//! a no-op. Closing a run's stream ends its subscription once the buffered
//! lines are read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Run {run_id} already has a listener")]
    AlreadySubscribed { run_id: String },
}

/// Registry of per-run line listeners, shared across runs.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    listeners: Mutex<HashMap<String, Listener>>,
    next_id: AtomicU64,
}

#[derive(Debug)]
struct Listener {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

impl StreamRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register the single listener for `run_id`.
    pub fn subscribe(self: &Arc<Self>, run_id: &str) -> Result<Subscription, StreamError> {
        let mut listeners = self.lock();
        if let Some(existing) = listeners.get(run_id)
            && !existing.tx.is_closed()
        {
            return Err(StreamError::AlreadySubscribed {
                run_id: run_id.to_string(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        listeners.insert(run_id.to_string(), Listener { id, tx });
        Ok(Subscription {
            run_id: run_id.to_string(),
            id,
            rx,
            registry: Arc::clone(self),
        })
    }

    /// Send one line to the listener of `run_id`, if any.
    ///
    /// Returns whether a listener received it.
    pub fn publish(&self, run_id: &str, line: &str) -> bool {
        let mut listeners = self.lock();
        let Some(listener) = listeners.get(run_id) else {
            return false;
        };
        if listener.tx.send(line.to_string()).is_ok() {
            return true;
        }
        listeners.remove(run_id);
        false
    }

    pub fn has_listener(&self, run_id: &str) -> bool {
        self.lock()
            .get(run_id)
            .is_some_and(|listener| !listener.tx.is_closed())
    }

    /// End the stream of `run_id`. Its subscriber still receives the lines
    /// already published, then `None`.
    pub fn close(&self, run_id: &str) {
        self.lock().remove(run_id);
    }

    fn unsubscribe(&self, run_id: &str, id: u64) {
        let mut listeners = self.lock();
        if listeners.get(run_id).is_some_and(|current| current.id == id) {
            listeners.remove(run_id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Listener>> {
        // A poisoned map only ever holds senders; keep using it.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The active listener for one run. Dropping it deregisters the run.
#[derive(Debug)]
pub struct Subscription {
    run_id: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<String>,
    registry: Arc<StreamRegistry>,
}

impl Subscription {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Next published line, or `None` once the run's stream is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.run_id, self.id);
    }
}
