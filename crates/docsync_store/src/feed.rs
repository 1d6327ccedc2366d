//! Change feed for observing committed writes.
//!
//! The change feed emits an event for every committed write, enabling:
//! - Live replication
//! - Local change tracking
//! - Re-running publishers when data changes
//!
//! Subscribers receive a backlog (every record after their starting cursor)
//! followed by live events, on an unbounded tokio channel. Dropping or
//! cancelling a [`ChangeSubscription`] unregisters it on the next emit.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A single committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    /// Update sequence assigned at commit.
    pub seq: u64,
    /// Document id.
    pub id: String,
    /// Revision written.
    pub rev: String,
}

/// Event delivered to change subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A write was committed.
    Change(ChangeRecord),
    /// The feed failed; no further events follow.
    Error(String),
    /// The feed ended; no further events follow.
    Complete,
}

/// Live subscription to a [`ChangeFeed`].
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: UnboundedReceiver<ChangeEvent>,
}

impl ChangeSubscription {
    /// Waits for the next event. `None` once the feed is gone or cancelled.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Returns the next event if one is ready.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Stops the subscription. Safe to call more than once.
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}

/// A change feed that distributes committed writes to subscribers.
///
/// The change feed:
/// - Emits only committed writes
/// - Preserves commit order
/// - Supports multiple subscribers
/// - Is thread-safe
pub struct ChangeFeed {
    /// Subscribers (senders).
    subscribers: RwLock<Vec<UnboundedSender<ChangeEvent>>>,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to live events only.
    pub fn subscribe(&self) -> ChangeSubscription {
        self.subscribe_with_backlog(Vec::new())
    }

    /// Subscribes, delivering `backlog` before any live event.
    ///
    /// The caller must hold whatever lock orders its commits so that no
    /// record is emitted between building the backlog and subscribing.
    pub fn subscribe_with_backlog(&self, backlog: Vec<ChangeRecord>) -> ChangeSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        for record in backlog {
            // Receiver is alive here, the send cannot fail
            let _ = tx.send(ChangeEvent::Change(record));
        }
        self.subscribers.write().push(tx);
        ChangeSubscription { rx }
    }

    /// Emits a committed record to all subscribers.
    pub fn emit(&self, record: ChangeRecord) {
        // Send to subscribers (remove disconnected ones)
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(ChangeEvent::Change(record.clone())).is_ok());
    }

    /// Fails every live subscription and unregisters it.
    pub fn fail(&self, message: &str) {
        let subscribers = std::mem::take(&mut *self.subscribers.write());
        for tx in subscribers {
            let _ = tx.send(ChangeEvent::Error(message.to_string()));
        }
    }

    /// Completes every live subscription and unregisters it.
    pub fn complete(&self) {
        let subscribers = std::mem::take(&mut *self.subscribers.write());
        for tx in subscribers {
            let _ = tx.send(ChangeEvent::Complete);
        }
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
