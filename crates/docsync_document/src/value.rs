//! Dynamic document value tree.

use crate::error::{TransformError, TransformResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::BTreeMap;

/// Document identifier field.
pub const ID_FIELD: &str = "_id";
/// Document revision field, maintained by the store.
pub const REV_FIELD: &str = "_rev";
/// Tombstone marker field, maintained by the store.
pub const DELETED_FIELD: &str = "_deleted";
/// Tri-state encryption flag field.
pub const ENCRYPTED_FIELD: &str = "encrypted";
/// Application document type field. Never encrypted so it stays queryable.
pub const DOC_TYPE_FIELD: &str = "docType";
/// Prefix of store-reserved fields.
pub const RESERVED_PREFIX: char = '_';
/// Marker contained in the id of design documents.
pub const DESIGN_MARKER: &str = "_design";
/// Marker contained in the id of built-in user records.
pub const USER_MARKER: &str = "org.couchdb.user:";

/// A dynamic document value.
///
/// Map keys are kept sorted so two equal documents always compare and
/// serialize the same way.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// JSON number (integer or float).
    Number(Number),
    /// Text string.
    Text(String),
    /// UTC timestamp. Rendered as RFC 3339 text in JSON.
    Date(DateTime<Utc>),
    /// Sequence of values.
    Array(Vec<Value>),
    /// Keyed values.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Canonical string form of a scalar leaf.
    ///
    /// Returns `None` for null, arrays and maps.
    pub fn canonical_string(&self) -> Option<String> {
        match self {
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Date(d) => Some(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Null | Value::Array(_) | Value::Map(_) => None,
        }
    }

    /// Converts this value into its JSON form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Date(_) => serde_json::Value::String(self.canonical_string().unwrap_or_default()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(i64::from(n).into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

/// A stored document: the top-level map of a [`Value`] tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty document with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut doc = Self::new();
        doc.insert(ID_FIELD, id.into());
        doc
    }

    /// Creates a document from an existing field map.
    pub fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    /// Builder-style field insertion.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Parses a document from a JSON object.
    pub fn from_json(json: serde_json::Value) -> TransformResult<Self> {
        match Value::from(json) {
            Value::Map(fields) => Ok(Self { fields }),
            other => Err(TransformError::invalid_document(format!(
                "expected a JSON object, got {}",
                kind_name(&other)
            ))),
        }
    }

    /// Renders this document as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Returns the document id, if present and textual.
    pub fn id(&self) -> Option<&str> {
        self.get(ID_FIELD).and_then(Value::as_text)
    }

    /// Returns the document revision, if present.
    pub fn rev(&self) -> Option<&str> {
        self.get(REV_FIELD).and_then(Value::as_text)
    }

    /// True for a deletion tombstone.
    pub fn is_deleted(&self) -> bool {
        self.get(DELETED_FIELD).and_then(Value::as_bool) == Some(true)
    }

    /// Returns the encryption flag. `None` when absent or not a boolean.
    pub fn encrypted(&self) -> Option<bool> {
        self.get(ENCRYPTED_FIELD).and_then(Value::as_bool)
    }

    /// Sets the encryption flag.
    pub fn set_encrypted(&mut self, encrypted: bool) {
        self.insert(ENCRYPTED_FIELD, encrypted);
    }

    /// Looks up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Inserts or replaces a top-level field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Removes a top-level field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Borrows the field map.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Consumes the document, returning its field map.
    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl TryFrom<serde_json::Value> for Document {
    type Error = TransformError;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        Document::from_json(json)
    }
}

impl From<Document> for serde_json::Value {
    fn from(doc: Document) -> Self {
        doc.to_json()
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::Text(_) => "string",
        Value::Date(_) => "date",
        Value::Array(_) => "array",
        Value::Map(_) => "object",
    }
}
