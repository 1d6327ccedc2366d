//! In-memory document store.

use crate::error::{StoreError, StoreResult};
use crate::feed::{ChangeFeed, ChangeRecord, ChangeSubscription};
use crate::store::{DocumentStore, PutResult, RemoteSession, StoreInfo, StoreProvider};
use async_trait::async_trait;
use docsync_document::{Document, DocumentHook, DELETED_FIELD, ID_FIELD, REV_FIELD};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct StoredDoc {
    doc: Document,
    rev: String,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, StoredDoc>,
    update_seq: u64,
    destroyed: bool,
    offline: bool,
    session: Option<RemoteSession>,
}

/// An in-memory [`DocumentStore`].
///
/// Documents are held exactly as the incoming hook produced them, so with an
/// encryption hook installed the store only ever holds ciphertext.
pub struct MemoryStore {
    name: String,
    inner: Mutex<Inner>,
    feed: ChangeFeed,
    hook: RwLock<Option<Arc<dyn DocumentHook>>>,
    users: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            feed: ChangeFeed::new(),
            hook: RwLock::new(None),
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a user that may log in.
    pub fn with_user(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.add_user(username, password);
        self
    }

    /// Registers a user that may log in.
    pub fn add_user(&self, username: impl Into<String>, password: impl Into<String>) {
        self.users.write().insert(username.into(), password.into());
    }

    /// Simulates losing or regaining connectivity.
    ///
    /// Going offline fails every live change subscription.
    pub fn set_online(&self, online: bool) {
        self.inner.lock().offline = !online;
        if !online {
            warn!(store = %self.name, "store went offline");
            self.feed.fail("store unreachable");
        } else {
            info!(store = %self.name, "store back online");
        }
    }

    /// True once [`destroy`](DocumentStore::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    /// The current authenticated session.
    pub fn session(&self) -> Option<RemoteSession> {
        self.inner.lock().session.clone()
    }

    /// Number of live change subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    /// Reads a document as stored, bypassing the outgoing hook.
    pub fn get_raw(&self, id: &str) -> Option<Document> {
        self.inner.lock().docs.get(id).map(|s| s.doc.clone())
    }

    fn check(&self, inner: &Inner) -> StoreResult<()> {
        if inner.destroyed {
            return Err(StoreError::destroyed(&self.name));
        }
        if inner.offline {
            return Err(StoreError::unreachable(&self.name));
        }
        Ok(())
    }

    fn current_hook(&self) -> Option<Arc<dyn DocumentHook>> {
        self.hook.read().clone()
    }

    fn apply_incoming(&self, doc: Document) -> StoreResult<Document> {
        match self.current_hook() {
            Some(hook) => Ok(hook.incoming(doc)?),
            None => Ok(doc),
        }
    }

    fn apply_outgoing(&self, doc: Document) -> StoreResult<Document> {
        match self.current_hook() {
            Some(hook) => Ok(hook.outgoing(doc)?),
            None => Ok(doc),
        }
    }

    /// Commits `doc` under `rev`. Caller holds the inner lock.
    fn commit(&self, inner: &mut Inner, id: String, rev: String, mut doc: Document) -> u64 {
        doc.insert(ID_FIELD, id.as_str());
        doc.insert(REV_FIELD, rev.as_str());
        inner.update_seq += 1;
        let seq = inner.update_seq;
        inner.docs.insert(
            id.clone(),
            StoredDoc {
                doc,
                rev: rev.clone(),
                seq,
            },
        );
        self.feed.emit(ChangeRecord { seq, id, rev });
        seq
    }
}

/// Generation number of a `N-hash` revision.
fn rev_generation(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(generation, _)| generation.parse().ok())
        .unwrap_or(0)
}

fn next_rev(generation: u64, doc: &Document) -> String {
    let digest = Sha256::digest(doc.to_json().to_string().as_bytes());
    let hash: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{generation}-{hash}")
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> StoreResult<StoreInfo> {
        let inner = self.inner.lock();
        self.check(&inner)?;
        Ok(StoreInfo {
            name: self.name.clone(),
            update_seq: inner.update_seq,
            doc_count: inner.docs.values().filter(|s| !s.doc.is_deleted()).count(),
        })
    }

    async fn put(&self, mut doc: Document) -> StoreResult<PutResult> {
        let id = match doc.id() {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                doc.insert(ID_FIELD, id.as_str());
                id
            }
        };
        let given_rev = doc.rev().map(String::from);
        let stored = self.apply_incoming(doc)?;

        let mut inner = self.inner.lock();
        self.check(&inner)?;

        let current = inner.docs.get(&id).map(|s| (s.rev.clone(), s.doc.is_deleted()));
        let expected = match &current {
            // A deleted document may be recreated without its revision
            Some((_, true)) if given_rev.is_none() => None,
            Some((rev, _)) => Some(rev.clone()),
            None => None,
        };
        if given_rev != expected {
            return Err(StoreError::conflict(id));
        }

        let generation = current.as_ref().map(|(rev, _)| rev_generation(rev)).unwrap_or(0) + 1;
        let rev = next_rev(generation, &stored);
        let seq = self.commit(&mut inner, id.clone(), rev.clone(), stored);
        debug!(store = %self.name, id = %id, rev = %rev, seq, "document written");

        Ok(PutResult { id, rev, seq })
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Document>> {
        let stored = {
            let inner = self.inner.lock();
            self.check(&inner)?;
            inner
                .docs
                .get(id)
                .filter(|s| !s.doc.is_deleted())
                .map(|s| s.doc.clone())
        };
        stored.map(|doc| self.apply_outgoing(doc)).transpose()
    }

    async fn all_docs(&self) -> StoreResult<Vec<Document>> {
        let stored: Vec<Document> = {
            let inner = self.inner.lock();
            self.check(&inner)?;
            inner
                .docs
                .values()
                .filter(|s| !s.doc.is_deleted())
                .map(|s| s.doc.clone())
                .collect()
        };
        stored
            .into_iter()
            .map(|doc| self.apply_outgoing(doc))
            .collect()
    }

    async fn remove(&self, id: &str, rev: &str) -> StoreResult<PutResult> {
        let mut inner = self.inner.lock();
        self.check(&inner)?;

        let generation = match inner.docs.get(id) {
            Some(s) if s.rev == rev && !s.doc.is_deleted() => rev_generation(rev) + 1,
            _ => return Err(StoreError::conflict(id)),
        };

        let tombstone = Document::with_id(id).field(DELETED_FIELD, true);
        let new_rev = next_rev(generation, &tombstone);
        let seq = self.commit(&mut inner, id.to_string(), new_rev.clone(), tombstone);
        debug!(store = %self.name, id, rev = %new_rev, seq, "document deleted");

        Ok(PutResult {
            id: id.to_string(),
            rev: new_rev,
            seq,
        })
    }

    async fn fetch_replica(&self, id: &str) -> StoreResult<Option<Document>> {
        let stored = {
            let inner = self.inner.lock();
            self.check(&inner)?;
            inner.docs.get(id).map(|s| s.doc.clone())
        };
        stored.map(|doc| self.apply_outgoing(doc)).transpose()
    }

    async fn put_replica(&self, doc: Document) -> StoreResult<bool> {
        let id = doc
            .id()
            .map(String::from)
            .ok_or_else(|| StoreError::InvalidDocument("replicated document has no _id".into()))?;
        let rev = doc
            .rev()
            .map(String::from)
            .ok_or_else(|| StoreError::InvalidDocument(format!("`{id}` has no _rev")))?;
        let stored = self.apply_incoming(doc)?;

        let mut inner = self.inner.lock();
        self.check(&inner)?;

        if let Some(existing) = inner.docs.get(&id) {
            // Higher generation wins, ties broken by revision string
            let ours = (rev_generation(&existing.rev), existing.rev.as_str());
            if ours >= (rev_generation(&rev), rev.as_str()) {
                return Ok(false);
            }
        }

        let seq = self.commit(&mut inner, id.clone(), rev.clone(), stored);
        debug!(store = %self.name, id = %id, rev = %rev, seq, "replica written");
        Ok(true)
    }

    fn changes(&self, since: u64) -> StoreResult<ChangeSubscription> {
        let inner = self.inner.lock();
        self.check(&inner)?;

        let mut backlog: Vec<ChangeRecord> = inner
            .docs
            .iter()
            .filter(|(_, s)| s.seq > since)
            .map(|(id, s)| ChangeRecord {
                seq: s.seq,
                id: id.clone(),
                rev: s.rev.clone(),
            })
            .collect();
        backlog.sort_by_key(|r| r.seq);

        Ok(self.feed.subscribe_with_backlog(backlog))
    }

    fn register_transform(&self, hook: Arc<dyn DocumentHook>) {
        *self.hook.write() = Some(hook);
    }

    async fn destroy(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.docs.clear();
        inner.update_seq = 0;
        inner.destroyed = true;
        inner.session = None;
        self.feed.complete();
        info!(store = %self.name, "store destroyed");
        Ok(())
    }

    async fn login(&self, username: &str, password: &str) -> StoreResult<RemoteSession> {
        let mut inner = self.inner.lock();
        self.check(&inner)?;

        let accepted = self
            .users
            .read()
            .get(username)
            .is_some_and(|expected| expected == password);
        if !accepted {
            return Err(StoreError::Unauthorized(
                "name or password is incorrect".into(),
            ));
        }

        let session = RemoteSession {
            name: username.to_string(),
        };
        inner.session = Some(session.clone());
        Ok(session)
    }

    async fn logout(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        self.check(&inner)?;
        inner.session = None;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .field("feed", &self.feed)
            .finish()
    }
}

/// [`StoreProvider`] over in-memory stores.
///
/// Local stores are created on demand and recreated after being destroyed.
/// Remote stores must be registered with [`add_remote`](Self::add_remote).
#[derive(Default)]
pub struct MemoryProvider {
    locals: Mutex<HashMap<String, Arc<MemoryStore>>>,
    remotes: RwLock<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryProvider {
    /// Creates a provider with no remotes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `store` reachable under `address`.
    pub fn add_remote(&self, address: impl Into<String>, store: Arc<MemoryStore>) {
        self.remotes.write().insert(address.into(), store);
    }

    /// Returns the local store currently open under `name`.
    pub fn local(&self, name: &str) -> Option<Arc<MemoryStore>> {
        self.locals.lock().get(name).cloned()
    }
}

#[async_trait]
impl StoreProvider for MemoryProvider {
    async fn open_local(&self, name: &str) -> StoreResult<Arc<dyn DocumentStore>> {
        let mut locals = self.locals.lock();
        let store = match locals.get(name) {
            Some(store) if !store.is_destroyed() => Arc::clone(store),
            _ => {
                let store = Arc::new(MemoryStore::new(name));
                locals.insert(name.to_string(), Arc::clone(&store));
                store
            }
        };
        Ok(store)
    }

    async fn open_remote(&self, address: &str) -> StoreResult<Arc<dyn DocumentStore>> {
        let store = self
            .remotes
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(address.to_string()))?;
        Ok(store)
    }
}
