//! Replication links between the local and the remote store.

use docsync_store::{replicate, DocumentStore, ReplicationEvent};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

/// Replication direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local to remote.
    Push,
    /// Remote to local.
    Pull,
}

impl Direction {
    /// Lowercase name of the direction.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
        }
    }
}

/// A replication event tagged with the link that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    /// Direction of the link.
    pub direction: Direction,
    /// Generation of the link.
    pub generation: u64,
    /// The replication event.
    pub event: ReplicationEvent,
}

/// One running direction of live replication.
///
/// Events are forwarded to the owner's inbox until the link is cancelled
/// or dropped.
#[derive(Debug)]
pub struct ReplicationLink {
    direction: Direction,
    generation: u64,
    forwarder: JoinHandle<()>,
}

impl ReplicationLink {
    /// Starts replicating in `direction` and forwarding events through `wrap`.
    pub fn start<M, F>(
        direction: Direction,
        generation: u64,
        local: Arc<dyn DocumentStore>,
        remote: Arc<dyn DocumentStore>,
        sink: UnboundedSender<M>,
        wrap: F,
    ) -> Self
    where
        M: Send + 'static,
        F: Fn(LinkEvent) -> M + Send + 'static,
    {
        let (source, target) = match direction {
            Direction::Push => (local, remote),
            Direction::Pull => (remote, local),
        };
        let mut replication = replicate(source, target);

        let forwarder = tokio::spawn(async move {
            // Dropping `replication` on exit or abort stops the replication task
            while let Some(event) = replication.recv().await {
                let event = LinkEvent {
                    direction,
                    generation,
                    event,
                };
                if sink.send(wrap(event)).is_err() {
                    break;
                }
            }
        });

        debug!(direction = direction.as_str(), generation, "replication link started");
        Self {
            direction,
            generation,
            forwarder,
        }
    }

    /// Direction of the link.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Generation of the link.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stops the link.
    pub fn cancel(self) {
        debug!(
            direction = self.direction.as_str(),
            generation = self.generation,
            "replication link cancelled"
        );
    }
}

impl Drop for ReplicationLink {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// The push and pull links of a session, at most one per direction.
pub struct LinkPair<M> {
    push: Option<ReplicationLink>,
    pull: Option<ReplicationLink>,
    next_generation: u64,
    sink: UnboundedSender<M>,
    wrap: fn(LinkEvent) -> M,
}

impl<M: Send + 'static> LinkPair<M> {
    /// Creates an empty pair forwarding events to `sink` through `wrap`.
    pub fn new(sink: UnboundedSender<M>, wrap: fn(LinkEvent) -> M) -> Self {
        Self {
            push: None,
            pull: None,
            next_generation: 0,
            sink,
            wrap,
        }
    }

    fn slot(&mut self, direction: Direction) -> &mut Option<ReplicationLink> {
        match direction {
            Direction::Push => &mut self.push,
            Direction::Pull => &mut self.pull,
        }
    }

    /// Starts a link, cancelling any existing link in that direction first.
    pub fn start(
        &mut self,
        direction: Direction,
        local: Arc<dyn DocumentStore>,
        remote: Arc<dyn DocumentStore>,
    ) -> u64 {
        self.cancel(direction);
        self.next_generation += 1;
        let generation = self.next_generation;
        let link = ReplicationLink::start(
            direction,
            generation,
            local,
            remote,
            self.sink.clone(),
            self.wrap,
        );
        *self.slot(direction) = Some(link);
        generation
    }

    /// Cancels the link in `direction`, if any.
    pub fn cancel(&mut self, direction: Direction) {
        if let Some(link) = self.slot(direction).take() {
            link.cancel();
        }
    }

    /// Cancels both links.
    pub fn cancel_all(&mut self) {
        self.cancel(Direction::Push);
        self.cancel(Direction::Pull);
    }

    /// Releases the link in `direction` after its replication ended on its
    /// own. No-op unless `generation` is the live link.
    pub fn finish(&mut self, direction: Direction, generation: u64) {
        if self.is_current(direction, generation) {
            self.slot(direction).take();
            debug!(direction = direction.as_str(), generation, "replication link ended");
        }
    }

    /// True if `generation` is the live link in `direction`.
    pub fn is_current(&self, direction: Direction, generation: u64) -> bool {
        let slot = match direction {
            Direction::Push => &self.push,
            Direction::Pull => &self.pull,
        };
        slot.as_ref().is_some_and(|link| link.generation() == generation)
    }

    /// Number of live links.
    pub fn len(&self) -> usize {
        usize::from(self.push.is_some()) + usize::from(self.pull.is_some())
    }

    /// True when no link is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
