//! Re-running a user action on every local change without overlap.

use crate::error::SessionResult;
use docsync_store::{ChangeEvent, DocumentStore};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Error returned by a published action.
pub type PublishError = Box<dyn std::error::Error + Send + Sync>;

/// An action to run now and after every local change.
pub type PublishAction = Arc<dyn Fn() -> BoxFuture<'static, Result<(), PublishError>> + Send + Sync>;

/// Wraps an async closure as a [`PublishAction`].
pub fn publish_action<F, Fut>(f: F) -> PublishAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), PublishError>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<(), PublishError>> { Box::pin(f()) })
}

/// Notification from the gate's background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishEvent {
    /// The local store changed.
    Trigger {
        /// Publisher generation.
        generation: u64,
    },
    /// A run of the action finished.
    Settled {
        /// Run that finished.
        run: u64,
        /// Outcome of the run.
        result: Result<(), String>,
    },
}

/// Reentrancy guard around the published action.
///
/// At most one run is outstanding, across publisher replacement too:
/// triggers that arrive while a run is in flight are dropped, including the
/// initial run of a newly published action.
pub struct PublishGate<M> {
    action: Option<PublishAction>,
    running: Option<u64>,
    next_run: u64,
    generation: u64,
    feed: Option<JoinHandle<()>>,
    sink: UnboundedSender<M>,
    wrap: fn(PublishEvent) -> M,
}

impl<M: Send + 'static> PublishGate<M> {
    /// Creates a gate with nothing published.
    pub fn new(sink: UnboundedSender<M>, wrap: fn(PublishEvent) -> M) -> Self {
        Self {
            action: None,
            running: None,
            next_run: 0,
            generation: 0,
            feed: None,
            sink,
            wrap,
        }
    }

    /// Replaces the published action, runs it once unless a run is still in
    /// flight, and subscribes it to local changes.
    pub async fn publish(
        &mut self,
        action: PublishAction,
        store: &Arc<dyn DocumentStore>,
    ) -> SessionResult<()> {
        self.stop();
        self.action = Some(action);

        let since = store.info().await?.update_seq.saturating_sub(1);
        let mut subscription = store.changes(since)?;
        let generation = self.generation;
        let sink = self.sink.clone();
        let wrap = self.wrap;

        self.feed = Some(tokio::spawn(async move {
            while let Some(ChangeEvent::Change(_)) = subscription.recv().await {
                if sink.send(wrap(PublishEvent::Trigger { generation })).is_err() {
                    break;
                }
            }
        }));

        debug!(since, generation, "action published");
        if !self.trigger(generation) {
            debug!(generation, "initial run dropped, previous run still in flight");
        }
        Ok(())
    }

    /// Runs the action unless a run is already outstanding. Returns true if
    /// a run was started.
    pub fn trigger(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.running.is_some() {
            return false;
        }
        let Some(action) = self.action.clone() else {
            return false;
        };

        self.next_run += 1;
        let run = self.next_run;
        self.running = Some(run);
        let sink = self.sink.clone();
        let wrap = self.wrap;
        tokio::spawn(async move {
            let result = action().await.map_err(|e| e.to_string());
            let _ = sink.send(wrap(PublishEvent::Settled { run, result }));
        });
        true
    }

    /// Records the end of a run and clears the guard if it was the
    /// outstanding one.
    pub fn settle(&mut self, run: u64, result: Result<(), String>) {
        if let Err(error) = &result {
            warn!(run, error = %error, "published action failed");
        }
        if self.running == Some(run) {
            self.running = None;
        }
    }

    /// Unsubscribes and forgets the action. A run already in flight finishes
    /// on its own and keeps the guard until it settles.
    pub fn stop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
        self.action = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// True while a run is outstanding.
    pub fn in_progress(&self) -> bool {
        self.running.is_some()
    }

    /// Generation of the current publisher.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<M> Drop for PublishGate<M> {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }
}
