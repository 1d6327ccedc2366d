//! # docsync Session
//!
//! Sync session controller for a local-first document store.
//!
//! This crate provides:
//! - Connection status state machine (offline → connecting → idle/sending/receiving)
//! - Progressive reconnection with linear backoff
//! - Push and pull replication links and translation of their events into status
//! - Local change tracking with a persisted event log
//! - Publishing an action that re-runs on every local change without overlap
//! - Field-level encryption installed on the local and the remote store
//!
//! ## Architecture
//!
//! [`SessionController`] is a handle to a single actor task that owns all
//! session state. Timers, links, the change tracker and the publish gate run
//! as separate tasks that only post messages to the actor's inbox.
//!
//! ## Key Invariants
//!
//! - At most one retry timer, one status timer and one link per direction are live
//! - The retry delay never exceeds its maximum
//! - Events from cancelled links or subscriptions are ignored
//! - A published action never runs twice at once

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod config;
mod controller;
mod error;
mod link;
mod publish;
mod settings;
mod status;
mod timer;
mod tracker;

pub use backoff::RetrySchedule;
pub use config::{RetryConfig, SessionConfig, DEFAULT_LOCAL_NAME};
pub use controller::SessionController;
pub use error::{SessionError, SessionResult};
pub use link::{Direction, LinkEvent, LinkPair, ReplicationLink};
pub use publish::{publish_action, PublishAction, PublishError, PublishEvent, PublishGate};
pub use settings::{JsonFileStore, MemorySettingsStore, Settings, SettingsStore, StatusStore};
pub use status::{EventName, EventRecord, EventStream, SessionState, SessionStatus, StatusLog};
pub use timer::DebouncedTimer;
pub use tracker::{ChangeTracker, TrackerEvent};

pub use docsync_store::{DocumentStore, StoreProvider};
