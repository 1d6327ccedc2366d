//! Recursive field-level encryption of documents.
//!
//! The walk is a structural recursion over [`Value`]. Containers are rebuilt,
//! reserved keys are copied verbatim, and every eligible scalar leaf is handed
//! to a [`LeafCipher`]. Because a new tree is built, an error anywhere leaves
//! the input untouched and no half-encrypted document can escape.
//!
//! Text leaves encrypt their string directly. Other scalars encrypt their
//! canonical string form and carry a short type tag in front of the
//! ciphertext so decryption can restore the original type:
//!
//! | leaf   | stored as          |
//! |--------|--------------------|
//! | text   | `<ciphertext>`     |
//! | number | `n:<ciphertext>`   |
//! | bool   | `b:<ciphertext>`   |
//! | date   | `d:<ciphertext>`   |

use crate::crypto::CryptoPort;
use crate::error::{TransformError, TransformResult};
use crate::hook::HookScope;
use crate::value::{Document, Value, DOC_TYPE_FIELD, ENCRYPTED_FIELD, RESERVED_PREFIX};
use chrono::{DateTime, Utc};
use serde_json::Number;
use std::collections::BTreeMap;
use std::str::FromStr;

const NUMBER_TAG: &str = "n:";
const BOOL_TAG: &str = "b:";
const DATE_TAG: &str = "d:";

/// Returns true if the field is subject to the transform.
fn is_eligible(key: &str) -> bool {
    key != DOC_TYPE_FIELD && key != ENCRYPTED_FIELD && !key.starts_with(RESERVED_PREFIX)
}

/// Leaf visitor applied to every eligible scalar.
trait LeafCipher {
    fn leaf(&self, key: &str, value: &Value) -> TransformResult<Value>;
}

struct Sealer<'a, C: ?Sized> {
    crypto: &'a C,
    password: &'a str,
}

impl<C: CryptoPort + ?Sized> LeafCipher for Sealer<'_, C> {
    fn leaf(&self, _key: &str, value: &Value) -> TransformResult<Value> {
        let tag = match value {
            Value::Text(_) => "",
            Value::Number(_) => NUMBER_TAG,
            Value::Bool(_) => BOOL_TAG,
            Value::Date(_) => DATE_TAG,
            Value::Null | Value::Array(_) | Value::Map(_) => return Ok(value.clone()),
        };
        let plain = value.canonical_string().unwrap_or_default();
        let sealed = self.crypto.encrypt(&plain, self.password)?;
        Ok(Value::Text(format!("{tag}{sealed}")))
    }
}

struct Opener<'a, C: ?Sized> {
    crypto: &'a C,
    password: &'a str,
}

impl<C: CryptoPort + ?Sized> LeafCipher for Opener<'_, C> {
    fn leaf(&self, key: &str, value: &Value) -> TransformResult<Value> {
        let text = value.as_text().ok_or_else(|| TransformError::malformed(key))?;

        if let Some(sealed) = text.strip_prefix(NUMBER_TAG) {
            let plain = self.crypto.decrypt(sealed, self.password)?;
            Number::from_str(&plain)
                .map(Value::Number)
                .map_err(|_| TransformError::malformed(key))
        } else if let Some(sealed) = text.strip_prefix(BOOL_TAG) {
            match self.crypto.decrypt(sealed, self.password)?.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(TransformError::malformed(key)),
            }
        } else if let Some(sealed) = text.strip_prefix(DATE_TAG) {
            let plain = self.crypto.decrypt(sealed, self.password)?;
            DateTime::parse_from_rfc3339(&plain)
                .map(|d| Value::Date(d.with_timezone(&Utc)))
                .map_err(|_| TransformError::malformed(key))
        } else {
            self.crypto.decrypt(text, self.password).map(Value::Text)
        }
    }
}

fn walk_map(
    map: &BTreeMap<String, Value>,
    cipher: &dyn LeafCipher,
) -> TransformResult<BTreeMap<String, Value>> {
    map.iter()
        .map(|(key, value)| {
            let out = if is_eligible(key) {
                walk_value(key, value, cipher)?
            } else {
                value.clone()
            };
            Ok((key.clone(), out))
        })
        .collect()
}

fn walk_value(key: &str, value: &Value, cipher: &dyn LeafCipher) -> TransformResult<Value> {
    match value {
        Value::Map(map) => Ok(Value::Map(walk_map(map, cipher)?)),
        Value::Array(items) => items
            .iter()
            .map(|item| walk_value(key, item, cipher))
            .collect::<TransformResult<Vec<_>>>()
            .map(Value::Array),
        Value::Null => Ok(Value::Null),
        leaf => cipher.leaf(key, leaf),
    }
}

/// Encrypts and decrypts documents field by field.
#[derive(Debug, Clone, Default)]
pub struct DocumentTransform<C> {
    crypto: C,
}

impl<C: CryptoPort> DocumentTransform<C> {
    /// Creates a transform over the given cipher.
    pub fn new(crypto: C) -> Self {
        Self { crypto }
    }

    /// Returns the underlying cipher.
    pub fn crypto(&self) -> &C {
        &self.crypto
    }

    /// Write-path transform.
    ///
    /// Design documents and user records pass through. Documents flagged
    /// `encrypted: false` are encrypted and flipped to `true`; every other
    /// flag state passes through unchanged.
    pub fn encrypt_on_write(&self, doc: Document, password: Option<&str>) -> TransformResult<Document> {
        if HookScope::Local.exempts(&doc) {
            return Ok(doc);
        }
        self.seal(doc, password)
    }

    /// Read-path transform.
    ///
    /// Design documents and user records pass through. Documents flagged
    /// `encrypted: true` are decrypted and flipped to `false`; every other
    /// flag state passes through unchanged.
    pub fn decrypt_on_read(&self, doc: Document, password: Option<&str>) -> TransformResult<Document> {
        if HookScope::Local.exempts(&doc) {
            return Ok(doc);
        }
        self.open(doc, password)
    }

    /// Encrypts a document flagged `encrypted: false`, without id gating.
    pub fn seal(&self, doc: Document, password: Option<&str>) -> TransformResult<Document> {
        if doc.encrypted() != Some(false) {
            return Ok(doc);
        }
        let password = password.ok_or(TransformError::MissingPassword)?;
        let mut out = self.encrypt_fields(&doc, password)?;
        out.set_encrypted(true);
        Ok(out)
    }

    /// Decrypts a document flagged `encrypted: true`, without id gating.
    pub fn open(&self, doc: Document, password: Option<&str>) -> TransformResult<Document> {
        if doc.encrypted() != Some(true) {
            return Ok(doc);
        }
        let password = password.ok_or(TransformError::MissingPassword)?;
        let mut out = self.decrypt_fields(&doc, password)?;
        out.set_encrypted(false);
        Ok(out)
    }

    /// Encrypts every eligible field regardless of the flag.
    pub fn encrypt_fields(&self, doc: &Document, password: &str) -> TransformResult<Document> {
        let sealer = Sealer {
            crypto: &self.crypto,
            password,
        };
        walk_map(doc.fields(), &sealer).map(Document::from_fields)
    }

    /// Decrypts every eligible field regardless of the flag.
    pub fn decrypt_fields(&self, doc: &Document, password: &str) -> TransformResult<Document> {
        let opener = Opener {
            crypto: &self.crypto,
            password,
        };
        walk_map(doc.fields(), &opener).map(Document::from_fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PasswordCipher;
    use crate::value::ID_FIELD;
    use chrono::TimeZone;
    use serde_json::json;

    /// Reversible, inspectable cipher for structural assertions.
    struct Rot;

    impl CryptoPort for Rot {
        fn encrypt(&self, plaintext: &str, password: &str) -> TransformResult<String> {
            Ok(format!("<{password}|{}>", plaintext.chars().rev().collect::<String>()))
        }

        fn decrypt(&self, ciphertext: &str, password: &str) -> TransformResult<String> {
            let inner = ciphertext
                .strip_prefix(&format!("<{password}|"))
                .and_then(|s| s.strip_suffix('>'))
                .ok_or_else(|| TransformError::decryption_failed("bad envelope"))?;
            Ok(inner.chars().rev().collect())
        }
    }

    fn alice() -> Document {
        Document::from_json(json!({
            "_id": "doc1",
            "encrypted": false,
            "name": "Alice",
            "tags": ["x", "y"]
        }))
        .unwrap()
    }

    #[test]
    fn encrypts_scalars_and_sequences() {
        let transform = DocumentTransform::new(Rot);
        let sealed = transform.encrypt_on_write(alice(), Some("pw")).unwrap();

        assert_eq!(sealed.id(), Some("doc1"));
        assert_eq!(sealed.encrypted(), Some(true));
        assert_eq!(sealed.get("name"), Some(&Value::from("<pw|ecilA>")));
        assert_eq!(
            sealed.get("tags"),
            Some(&Value::from(vec!["<pw|x>", "<pw|y>"]))
        );

        let opened = transform.decrypt_on_read(sealed, Some("pw")).unwrap();
        assert_eq!(opened, alice());
    }

    #[test]
    fn aes_roundtrip_restores_document() {
        let transform = DocumentTransform::new(PasswordCipher::new());
        let sealed = transform.encrypt_on_write(alice(), Some("secret")).unwrap();

        assert_ne!(sealed.get("name"), Some(&Value::from("Alice")));
        let opened = transform.decrypt_on_read(sealed, Some("secret")).unwrap();
        assert_eq!(opened, alice());
    }

    #[test]
    fn reserved_fields_are_untouched_at_every_depth() {
        let transform = DocumentTransform::new(Rot);
        let doc = Document::from_json(json!({
            "_id": "doc2",
            "_rev": "1-abc",
            "encrypted": false,
            "docType": "note",
            "body": {
                "_meta": "keep",
                "docType": "inner",
                "text": "hide"
            }
        }))
        .unwrap();

        let sealed = transform.encrypt_on_write(doc, Some("pw")).unwrap();
        assert_eq!(sealed.get(ID_FIELD), Some(&Value::from("doc2")));
        assert_eq!(sealed.rev(), Some("1-abc"));
        assert_eq!(sealed.get(DOC_TYPE_FIELD), Some(&Value::from("note")));

        let body = sealed.get("body").unwrap();
        assert_eq!(body.get("_meta"), Some(&Value::from("keep")));
        assert_eq!(body.get("docType"), Some(&Value::from("inner")));
        assert_eq!(body.get("text"), Some(&Value::from("<pw|edih>")));
    }

    #[test]
    fn typed_leaves_roundtrip() {
        let transform = DocumentTransform::new(Rot);
        let when = Utc.with_ymd_and_hms(2023, 7, 4, 8, 0, 0).unwrap();
        let doc = Document::with_id("typed")
            .field(ENCRYPTED_FIELD, false)
            .field("count", 42i64)
            .field("ratio", Value::Number(Number::from_f64(0.5).unwrap()))
            .field("done", true)
            .field("due", when)
            .field("nothing", ())
            .field("nested", vec![Value::from(vec![1i64, 2]), Value::from("z")]);

        let sealed = transform.encrypt_on_write(doc.clone(), Some("k")).unwrap();
        assert_eq!(sealed.get("count"), Some(&Value::from("n:<k|24>")));
        assert_eq!(sealed.get("done"), Some(&Value::from("b:<k|eurt>")));
        assert!(sealed.get("due").unwrap().as_text().unwrap().starts_with("d:"));
        assert_eq!(sealed.get("nothing"), Some(&Value::Null));

        let opened = transform.decrypt_on_read(sealed, Some("k")).unwrap();
        assert_eq!(opened, doc);
    }

    #[test]
    fn nanosecond_dates_survive_the_cipher() {
        let transform = DocumentTransform::new(PasswordCipher::new());
        let when = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let doc = Document::with_id("stamp")
            .field(ENCRYPTED_FIELD, false)
            .field("seen_at", when);

        let sealed = transform.encrypt_on_write(doc.clone(), Some("pw")).unwrap();
        let opened = transform.decrypt_on_read(sealed, Some("pw")).unwrap();
        assert_eq!(opened.get("seen_at"), Some(&Value::Date(when)));
        assert_eq!(opened, doc);
    }

    #[test]
    fn flag_gates_both_paths() {
        let transform = DocumentTransform::new(Rot);

        // Already encrypted: write passes through
        let mut flagged = alice();
        flagged.set_encrypted(true);
        assert_eq!(
            transform.encrypt_on_write(flagged.clone(), Some("pw")).unwrap(),
            flagged
        );

        // Plaintext: read passes through
        assert_eq!(transform.decrypt_on_read(alice(), Some("pw")).unwrap(), alice());

        // Missing or non-boolean flag passes through on both paths
        let mut unflagged = alice();
        unflagged.remove(ENCRYPTED_FIELD);
        assert_eq!(
            transform.encrypt_on_write(unflagged.clone(), Some("pw")).unwrap(),
            unflagged
        );
        unflagged.insert(ENCRYPTED_FIELD, "maybe");
        assert_eq!(
            transform.decrypt_on_read(unflagged.clone(), Some("pw")).unwrap(),
            unflagged
        );
    }

    #[test]
    fn exempt_ids_pass_through() {
        let transform = DocumentTransform::new(Rot);
        for id in ["_design/app", "org.couchdb.user:alice"] {
            let doc = Document::with_id(id)
                .field(ENCRYPTED_FIELD, false)
                .field("views", "x");
            assert_eq!(transform.encrypt_on_write(doc.clone(), Some("pw")).unwrap(), doc);
        }
    }

    #[test]
    fn missing_password_fails_without_partial_output() {
        let transform = DocumentTransform::new(Rot);
        assert_eq!(
            transform.encrypt_on_write(alice(), None),
            Err(TransformError::MissingPassword)
        );

        // Pass-through documents never need a password
        let mut flagged = alice();
        flagged.set_encrypted(true);
        assert!(transform.encrypt_on_write(flagged, None).is_ok());
    }

    #[test]
    fn decrypt_rejects_non_ciphertext_leaf() {
        let transform = DocumentTransform::new(Rot);
        let doc = Document::with_id("bad")
            .field(ENCRYPTED_FIELD, true)
            .field("count", 7i64);

        assert_eq!(
            transform.decrypt_on_read(doc, Some("pw")),
            Err(TransformError::malformed("count"))
        );
    }

    #[test]
    fn wrong_password_fails_the_read() {
        let transform = DocumentTransform::new(PasswordCipher::new());
        let sealed = transform.encrypt_on_write(alice(), Some("right")).unwrap();
        assert!(matches!(
            transform.decrypt_on_read(sealed, Some("wrong")),
            Err(TransformError::DecryptionFailed { .. })
        ));
    }
}
