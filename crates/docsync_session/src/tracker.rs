//! Local change tracking.

use crate::error::SessionResult;
use docsync_store::{ChangeEvent, DocumentStore};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

/// A local change feed event tagged with the subscription that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEvent {
    /// Generation of the subscription.
    pub generation: u64,
    /// The change feed event.
    pub event: ChangeEvent,
}

/// Follows the local store's change feed and forwards its events.
pub struct ChangeTracker<M> {
    task: Option<JoinHandle<()>>,
    generation: u64,
    sink: UnboundedSender<M>,
    wrap: fn(TrackerEvent) -> M,
}

impl<M: Send + 'static> ChangeTracker<M> {
    /// Creates an idle tracker forwarding events to `sink` through `wrap`.
    pub fn new(sink: UnboundedSender<M>, wrap: fn(TrackerEvent) -> M) -> Self {
        Self {
            task: None,
            generation: 0,
            sink,
            wrap,
        }
    }

    /// Subscribes to changes made after the store's current update sequence,
    /// replacing any previous subscription.
    pub async fn track(&mut self, store: &Arc<dyn DocumentStore>) -> SessionResult<()> {
        self.stop();

        let since = store.info().await?.update_seq;
        let mut subscription = store.changes(since)?;
        let generation = self.generation;
        let sink = self.sink.clone();
        let wrap = self.wrap;

        self.task = Some(tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let terminal = !matches!(event, ChangeEvent::Change(_));
                if sink.send(wrap(TrackerEvent { generation, event })).is_err() || terminal {
                    break;
                }
            }
        }));

        debug!(store = store.name(), since, generation, "tracking local changes");
        Ok(())
    }

    /// Cancels the subscription, if any.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// True if `generation` belongs to the live subscription.
    pub fn is_current(&self, generation: u64) -> bool {
        self.task.is_some() && generation == self.generation
    }
}

impl<M> Drop for ChangeTracker<M> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
