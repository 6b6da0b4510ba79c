//! Timers that fire by posting a synthetic event into the owning component's
//! queue instead of touching its state directly.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    Round,
    JoinBroadcast,
    SyncRetry,
}

pub struct TimerManager<E> {
    timers: HashMap<TimerId, JoinHandle<()>>,
    event_tx: mpsc::UnboundedSender<E>,
}

impl<E: Send + 'static> TimerManager<E> {
    pub fn new(event_tx: mpsc::UnboundedSender<E>) -> Self {
        Self {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Fires `event` after `duration`, replacing a pending timer with the
    /// same id.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration, event: E) {
        self.cancel_timer(id);

        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?id, "Timer fired");
            let _ = event_tx.send(event);
        });

        self.timers.insert(id, handle);
        debug!(?id, ?duration, "Timer set");
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
            trace!(?id, "Timer cancelled");
        }
    }

    pub fn cancel_all(&mut self) {
        for (id, handle) in self.timers.drain() {
            handle.abort();
            trace!(?id, "Timer cancelled (shutdown)");
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl<E> Drop for TimerManager<E> {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}
