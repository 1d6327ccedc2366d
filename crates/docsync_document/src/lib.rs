//! # docsync Document
//!
//! Document model and field-level encryption for docsync.
//!
//! This crate provides:
//! - A tagged document tree ([`Value`], [`Document`]) with JSON conversion
//! - The [`CryptoPort`] string cipher seam and its AES-256-GCM implementation
//! - [`DocumentTransform`], the recursive encrypt-on-write / decrypt-on-read walk
//! - [`EncryptionHook`], the store-level interception point built on the transform
//!
//! ## Key Invariants
//!
//! - Reserved fields (`_id`, `docType`, `encrypted`, any `_`-prefixed key) are never touched
//! - The `encrypted` flag always matches the state of the eligible leaves
//! - A failed transform never yields a partially transformed document

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crypto;
mod error;
mod hook;
mod transform;
mod value;

pub use crypto::{CryptoPort, PasswordCipher, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
pub use error::{TransformError, TransformResult};
pub use hook::{DocumentHook, EncryptionHook, HookScope, PasswordCell};
pub use transform::DocumentTransform;
pub use value::{
    Document, Value, DELETED_FIELD, DESIGN_MARKER, DOC_TYPE_FIELD, ENCRYPTED_FIELD, ID_FIELD,
    RESERVED_PREFIX, REV_FIELD, USER_MARKER,
};
