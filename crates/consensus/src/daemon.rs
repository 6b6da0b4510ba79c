use async_trait::async_trait;
use quorum_types::{ConsensusError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Consumer of one component's queue.
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    async fn handle(&self, event: E);
}

struct Worker<E> {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<mpsc::UnboundedReceiver<E>>,
}

/// Unbounded queue served by exactly one task.
///
/// The sender outlives start/stop cycles, so timers and producers holding a
/// clone keep working across restarts. Events still queued when the worker
/// stops are discarded.
pub struct Daemon<E> {
    name: String,
    sender: mpsc::UnboundedSender<E>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<E>>>,
    worker: Mutex<Option<Worker<E>>>,
}

impl<E: Send + 'static> Daemon<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_channel(name, mpsc::unbounded_channel())
    }

    /// Serves an existing channel whose sender was already handed out.
    pub fn from_channel(
        name: impl Into<String>,
        (sender, receiver): (mpsc::UnboundedSender<E>, mpsc::UnboundedReceiver<E>),
    ) -> Self {
        Self {
            name: name.into(),
            sender,
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<E> {
        self.sender.clone()
    }

    pub fn post(&self, event: E) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| ConsensusError::NotStarted(self.name.clone()))
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    pub async fn start(&self, handler: Arc<dyn EventHandler<E>>) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(ConsensusError::AlreadyStarted(self.name.clone()));
        }

        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| ConsensusError::AlreadyStarted(self.name.clone()))?;

        // leftovers were posted while stopped
        let mut stale = 0usize;
        while receiver.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("{} dropped {} events posted while stopped", self.name, stale);
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let name = self.name.clone();

        let handle = tokio::spawn(async move {
            debug!("{} worker started", name);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    event = receiver.recv() => match event {
                        Some(event) => handler.handle(event).await,
                        None => break,
                    },
                }
            }
            debug!("{} worker stopped", name);
            receiver
        });

        *worker = Some(Worker {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Stops the worker after the event in flight, if any, and discards
    /// whatever is still queued.
    pub async fn stop(&self) -> Result<()> {
        let worker = self
            .worker
            .lock()
            .await
            .take()
            .ok_or_else(|| ConsensusError::NotStarted(self.name.clone()))?;

        let _ = worker.stop.send(());
        match worker.handle.await {
            Ok(mut receiver) => {
                let mut discarded = 0usize;
                while receiver.try_recv().is_ok() {
                    discarded += 1;
                }
                if discarded > 0 {
                    warn!("{} discarded {} queued events on stop", self.name, discarded);
                }
                *self.receiver.lock().await = Some(receiver);
                Ok(())
            }
            Err(e) => {
                error!("{} worker failed: {}", self.name, e);
                Err(ConsensusError::NotStarted(self.name.clone()))
            }
        }
    }
}
