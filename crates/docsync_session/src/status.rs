//! Session status, state snapshot and the persisted event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Connection status of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Not connected.
    #[default]
    Offline,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected.
    Online,
    /// Connected with nothing left to replicate.
    Idle,
    /// Pushing local documents.
    Sending,
    /// Pulling remote documents.
    Receiving,
}

impl SessionStatus {
    /// Human-readable title for the status.
    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Online | SessionStatus::Idle => "Connected",
            SessionStatus::Connecting => "Trying to connect",
            SessionStatus::Offline => "Not connected",
            SessionStatus::Receiving => "Receiving Data",
            SessionStatus::Sending => "Sending Data",
        }
    }

    /// Lowercase name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Offline => "offline",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Online => "online",
            SessionStatus::Idle => "idle",
            SessionStatus::Sending => "sending",
            SessionStatus::Receiving => "receiving",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Current status.
    pub status: SessionStatus,
    /// Highest push `docs_written` seen since the last connect.
    pub docs_sent: u64,
    /// Highest pull `docs_written` seen since the last connect.
    pub docs_received: u64,
    /// Delay of the next reconnection attempt.
    pub current_retry_delay: Duration,
    /// Upper bound of the reconnection delay.
    pub max_retry_delay: Duration,
    /// Per-attempt growth of the reconnection delay.
    pub retry_delay_increment: Duration,
    /// When the last connection attempt started.
    pub last_connection_attempt: Option<DateTime<Utc>>,
    /// True while a published action is running.
    pub publish_in_progress: bool,
    /// Number of running replication links.
    pub live_links: usize,
}

/// Name of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventName {
    /// A change was observed or replicated.
    Change,
    /// A replication caught up.
    #[serde(rename = "uptodate")]
    UpToDate,
    /// A feed or replication failed.
    Error,
    /// A feed or replication ended.
    Complete,
}

impl EventName {
    /// Lowercase name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::Change => "change",
            EventName::UpToDate => "uptodate",
            EventName::Error => "error",
            EventName::Complete => "complete",
        }
    }
}

/// The last occurrence of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event payload.
    pub payload: serde_json::Value,
    /// When the event was observed.
    pub occurred_at: DateTime<Utc>,
}

/// Which event stream a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStream {
    /// The local change feed.
    LocalChanges,
    /// Replication from local to remote.
    ReplicationTo,
    /// Replication from remote to local.
    ReplicationFrom,
}

/// Persisted record of session activity.
///
/// Each stream keeps only the latest record per event name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusLog {
    /// Local writes not yet confirmed pushed.
    pub local_change_count: u64,
    /// Latest local change feed events.
    pub change_events: BTreeMap<EventName, EventRecord>,
    /// Latest push replication events.
    pub replication_to_events: BTreeMap<EventName, EventRecord>,
    /// Latest pull replication events.
    pub replication_from_events: BTreeMap<EventName, EventRecord>,
}

impl StatusLog {
    /// Records `name` on `stream`, overwriting the previous record.
    pub fn record(
        &mut self,
        stream: EventStream,
        name: EventName,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) {
        self.stream_mut(stream).insert(
            name,
            EventRecord {
                payload,
                occurred_at,
            },
        );
    }

    /// Returns the latest record of `name` on `stream`.
    pub fn last(&self, stream: EventStream, name: EventName) -> Option<&EventRecord> {
        self.stream(stream).get(&name)
    }

    /// Returns every record on `stream`.
    pub fn stream(&self, stream: EventStream) -> &BTreeMap<EventName, EventRecord> {
        match stream {
            EventStream::LocalChanges => &self.change_events,
            EventStream::ReplicationTo => &self.replication_to_events,
            EventStream::ReplicationFrom => &self.replication_from_events,
        }
    }

    fn stream_mut(&mut self, stream: EventStream) -> &mut BTreeMap<EventName, EventRecord> {
        match stream {
            EventStream::LocalChanges => &mut self.change_events,
            EventStream::ReplicationTo => &mut self.replication_to_events,
            EventStream::ReplicationFrom => &mut self.replication_from_events,
        }
    }

    /// Counts one more pending local change.
    pub fn increment_local_changes(&mut self) {
        self.local_change_count = self.local_change_count.saturating_add(1);
    }

    /// Clears the pending local change count.
    pub fn reset_local_changes(&mut self) {
        self.local_change_count = 0;
    }
}
