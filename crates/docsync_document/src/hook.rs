//! Store-level transform hooks.

use crate::crypto::CryptoPort;
use crate::error::TransformResult;
use crate::transform::DocumentTransform;
use crate::value::{Document, DESIGN_MARKER, USER_MARKER};
use parking_lot::RwLock;
use std::sync::Arc;

/// Interception point invoked by a store on every write and read.
pub trait DocumentHook: Send + Sync {
    /// Called with each document before it is written.
    fn incoming(&self, doc: Document) -> TransformResult<Document>;

    /// Called with each document after it is read.
    fn outgoing(&self, doc: Document) -> TransformResult<Document>;
}

/// Which store a hook is installed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookScope {
    /// The local store: decrypts on read so the application sees plaintext.
    Local,
    /// The remote store: documents never leave it in plaintext.
    Remote,
}

impl HookScope {
    /// Returns true if the document bypasses the transform in this scope.
    ///
    /// Documents without a textual id are never exempt.
    pub fn exempts(self, doc: &Document) -> bool {
        let Some(id) = doc.id() else {
            return false;
        };
        match self {
            HookScope::Local => id.contains(DESIGN_MARKER) || id.contains(USER_MARKER),
            HookScope::Remote => id.contains(DESIGN_MARKER),
        }
    }
}

/// Shared, replaceable password slot read by hooks at call time.
#[derive(Clone, Default)]
pub struct PasswordCell(Arc<RwLock<Option<String>>>);

impl PasswordCell {
    /// Creates a cell holding the given password.
    pub fn new(password: Option<String>) -> Self {
        Self(Arc::new(RwLock::new(password)))
    }

    /// Replaces the password.
    pub fn set(&self, password: Option<String>) {
        *self.0.write() = password;
    }

    /// Returns a copy of the current password.
    pub fn get(&self) -> Option<String> {
        self.0.read().clone()
    }

    /// True when a password is configured.
    pub fn is_set(&self) -> bool {
        self.0.read().is_some()
    }
}

impl std::fmt::Debug for PasswordCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PasswordCell")
            .field(&if self.is_set() { "[REDACTED]" } else { "None" })
            .finish()
    }
}

/// [`DocumentHook`] that applies a [`DocumentTransform`] with the current password.
pub struct EncryptionHook<C> {
    transform: Arc<DocumentTransform<C>>,
    password: PasswordCell,
    scope: HookScope,
}

impl<C: CryptoPort> EncryptionHook<C> {
    /// Creates a hook for the given scope.
    pub fn new(transform: Arc<DocumentTransform<C>>, password: PasswordCell, scope: HookScope) -> Self {
        Self {
            transform,
            password,
            scope,
        }
    }

    /// Local-store hook: encrypt on write, decrypt on read.
    pub fn local(transform: Arc<DocumentTransform<C>>, password: PasswordCell) -> Self {
        Self::new(transform, password, HookScope::Local)
    }

    /// Remote-store hook: encrypt plaintext in both directions.
    pub fn remote(transform: Arc<DocumentTransform<C>>, password: PasswordCell) -> Self {
        Self::new(transform, password, HookScope::Remote)
    }

    /// Returns the scope this hook was built for.
    pub fn scope(&self) -> HookScope {
        self.scope
    }
}

impl<C: CryptoPort> DocumentHook for EncryptionHook<C> {
    fn incoming(&self, doc: Document) -> TransformResult<Document> {
        if self.scope.exempts(&doc) {
            return Ok(doc);
        }
        let password = self.password.get();
        self.transform.seal(doc, password.as_deref())
    }

    fn outgoing(&self, doc: Document) -> TransformResult<Document> {
        if self.scope.exempts(&doc) {
            return Ok(doc);
        }
        let password = self.password.get();
        match self.scope {
            HookScope::Local => self.transform.open(doc, password.as_deref()),
            HookScope::Remote => self.transform.seal(doc, password.as_deref()),
        }
    }
}
