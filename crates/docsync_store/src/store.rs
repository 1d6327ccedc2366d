//! Store abstraction the sync session is written against.

use crate::error::StoreResult;
use crate::feed::ChangeSubscription;
use async_trait::async_trait;
use docsync_document::{Document, DocumentHook};
use serde::Serialize;
use std::sync::Arc;

/// Summary returned by [`DocumentStore::info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    /// Store name or address.
    pub name: String,
    /// Sequence of the most recent committed write.
    pub update_seq: u64,
    /// Number of live (not deleted) documents held.
    pub doc_count: usize,
}

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// Document id.
    pub id: String,
    /// Revision assigned to the write.
    pub rev: String,
    /// Sequence assigned to the write.
    pub seq: u64,
}

/// An authenticated session on a remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteSession {
    /// Authenticated user name.
    pub name: String,
}

/// A document store with a live change feed.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (in-memory, HTTP, embedded engine).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name (local) or address (remote) of the store.
    fn name(&self) -> &str;

    /// Returns the current update sequence and document count.
    async fn info(&self) -> StoreResult<StoreInfo>;

    /// Writes a document through the incoming hook, assigning a new revision.
    ///
    /// Documents without an id get a generated one. Updating an existing
    /// document requires its current `_rev`.
    async fn put(&self, doc: Document) -> StoreResult<PutResult>;

    /// Reads a document through the outgoing hook.
    async fn get(&self, id: &str) -> StoreResult<Option<Document>>;

    /// Reads every live document through the outgoing hook, ordered by id.
    async fn all_docs(&self) -> StoreResult<Vec<Document>>;

    /// Deletes a document by writing a tombstone revision.
    ///
    /// `rev` must be the document's current revision.
    async fn remove(&self, id: &str, rev: &str) -> StoreResult<PutResult>;

    /// Reads the latest revision of a document for replication, tombstones
    /// included, through the outgoing hook.
    async fn fetch_replica(&self, id: &str) -> StoreResult<Option<Document>>;

    /// Writes a replicated document, keeping its `_rev`.
    ///
    /// Returns `false` when the store already holds that revision or a newer one.
    async fn put_replica(&self, doc: Document) -> StoreResult<bool>;

    /// Subscribes to committed writes with sequence greater than `since`.
    fn changes(&self, since: u64) -> StoreResult<ChangeSubscription>;

    /// Installs the transform hook, replacing any previous one.
    fn register_transform(&self, hook: Arc<dyn DocumentHook>);

    /// Deletes all data and ends every live subscription.
    async fn destroy(&self) -> StoreResult<()>;

    /// Opens an authenticated session.
    async fn login(&self, username: &str, password: &str) -> StoreResult<RemoteSession>;

    /// Closes the authenticated session, if any.
    async fn logout(&self) -> StoreResult<()>;
}

/// Opens local and remote stores by name.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// Opens (or recreates after destroy) the local store.
    async fn open_local(&self, name: &str) -> StoreResult<Arc<dyn DocumentStore>>;

    /// Opens a handle to the remote store at `address`.
    async fn open_remote(&self, address: &str) -> StoreResult<Arc<dyn DocumentStore>>;
}
