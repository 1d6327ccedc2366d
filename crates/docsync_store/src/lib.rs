//! # docsync Store
//!
//! The document store collaborator of the sync session.
//!
//! This crate provides:
//! - The [`DocumentStore`] and [`StoreProvider`] traits the session is written against
//! - A [`ChangeFeed`] distributing committed writes to live subscribers
//! - [`MemoryStore`], an in-memory store with revisions and transform hooks
//! - [`replicate`], one-directional live replication between two stores
//!
//! ## Key Invariants
//!
//! - Every write passes through the registered hook's `incoming` path
//! - Every read passes through the registered hook's `outgoing` path
//! - A failed hook fails the read or write; nothing is stored
//! - Change events are emitted in commit order, one per committed write

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod feed;
mod memory;
mod replicate;
mod store;

pub use error::{StoreError, StoreResult};
pub use feed::{ChangeEvent, ChangeFeed, ChangeRecord, ChangeSubscription};
pub use memory::{MemoryProvider, MemoryStore};
pub use replicate::{replicate, Replication, ReplicationEvent, ReplicationInfo};
pub use store::{DocumentStore, PutResult, RemoteSession, StoreInfo, StoreProvider};
