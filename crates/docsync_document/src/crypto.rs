//! String cipher used for field-level encryption.
//!
//! The transform only depends on [`CryptoPort`]; [`PasswordCipher`] is the
//! default implementation.
//!
//! ## Security Model
//!
//! - AES-256-GCM authenticated encryption
//! - A fresh random salt and nonce per field
//! - Per-field key derived from the password with HKDF-SHA256
//! - Derived keys are zeroized on drop
//!
//! The ciphertext string is `base64(salt (16) || nonce (12) || ciphertext || tag (16))`.

use crate::error::{TransformError, TransformResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Size of the per-field HKDF salt in bytes.
pub const SALT_SIZE: usize = 16;

const KEY_INFO: &[u8] = b"docsync-field-key-v1";

/// Pure string encryption primitive.
///
/// Implementations must be deterministic in the sense that
/// `decrypt(encrypt(p, pw), pw) == p` for every plaintext `p`.
pub trait CryptoPort: Send + Sync {
    /// Encrypts `plaintext` under `password`.
    fn encrypt(&self, plaintext: &str, password: &str) -> TransformResult<String>;

    /// Decrypts a ciphertext produced by [`encrypt`](Self::encrypt).
    fn decrypt(&self, ciphertext: &str, password: &str) -> TransformResult<String>;
}

/// Key derived for a single field.
#[derive(Zeroize, ZeroizeOnDrop)]
struct FieldKey {
    bytes: [u8; KEY_SIZE],
}

impl FieldKey {
    fn derive(password: &str, salt: &[u8]) -> TransformResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), password.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(KEY_INFO, &mut bytes)
            .map_err(|_| TransformError::encryption_failed("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(GenericArray::from_slice(&self.bytes))
    }
}

/// AES-256-GCM [`CryptoPort`] keyed by a password.
#[derive(Debug, Default, Clone, Copy)]
pub struct PasswordCipher;

impl PasswordCipher {
    /// Creates a new password cipher.
    pub fn new() -> Self {
        Self
    }
}

impl CryptoPort for PasswordCipher {
    fn encrypt(&self, plaintext: &str, password: &str) -> TransformResult<String> {
        if password.is_empty() {
            return Err(TransformError::MissingPassword);
        }

        let mut salt = [0u8; SALT_SIZE];
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce_bytes);

        let key = FieldKey::derive(password, &salt)?;
        let sealed = key
            .cipher()
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| TransformError::encryption_failed("encryption error"))?;

        let mut out = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + sealed.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend(sealed);

        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str, password: &str) -> TransformResult<String> {
        if password.is_empty() {
            return Err(TransformError::MissingPassword);
        }

        let raw = STANDARD
            .decode(ciphertext)
            .map_err(|e| TransformError::decryption_failed(format!("invalid base64: {e}")))?;
        if raw.len() < SALT_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(TransformError::decryption_failed("ciphertext too short"));
        }

        let (salt, rest) = raw.split_at(SALT_SIZE);
        let (nonce, sealed) = rest.split_at(NONCE_SIZE);

        let key = FieldKey::derive(password, salt)?;
        let plain = key
            .cipher()
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| TransformError::decryption_failed("decryption error"))?;

        String::from_utf8(plain)
            .map_err(|_| TransformError::decryption_failed("plaintext is not UTF-8"))
    }
}
