//! Core domain types for the document store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::error::{DocError, Result};

/// Internal name of the identifier column on every primary table.
pub const ID_COLUMN: &str = "_id";

/// Default user-facing identifier field.
pub const DEFAULT_ID_FIELD: &str = "_id";

/// Name of the reserved metadata collection.
pub const METADATA_COLLECTION: &str = "_metadata";

/// Generate a fresh opaque document identifier.
pub fn generate_id() -> String {
    Ulid::new().to_string()
}

/// Check whether a JSON value is a scalar (null, bool, number, or string).
pub fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// Remove the identifier field from a document body, returning its value.
///
/// Only the configured identifier field is removed; the stored JSON never
/// carries that key (it lives in the primary-key column). Any other key,
/// including a literal `_id` under a custom identifier field, is ordinary
/// document data. The identifier, when present, must be a JSON string.
pub fn take_id(doc: &mut Map<String, Value>, id_field: &str) -> Result<Option<String>> {
    match doc.remove(id_field) {
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(DocError::invalid_operand(
            "identifier",
            format!("expected a string, got {}", other),
        )),
        None => Ok(None),
    }
}

/// Re-attach the identifier to a document body under the configured field.
pub fn inject_id(mut doc: Map<String, Value>, id_field: &str, id: &str) -> Map<String, Value> {
    doc.insert(id_field.to_string(), Value::String(id.to_string()));
    doc
}

/// Sort direction for ordering hints and value indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Parse a Mongo-style ±1 direction.
    pub fn from_signum(n: i64) -> Option<Self> {
        match n {
            1 => Some(Self::Ascending),
            -1 => Some(Self::Descending),
            _ => None,
        }
    }

    /// SQL keyword for this direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Ascending
    }
}

/// Options for `update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Apply to every matching row instead of a single one.
    pub multi: bool,

    /// Insert when no row matches.
    pub upsert: bool,
}

/// Options for `delete`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Delete at most one matching row.
    pub just_one: bool,
}

/// Persistent per-collection metadata record.
///
/// Stored as a document in the reserved metadata collection, keyed by the
/// collection name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMeta {
    /// Collection name (the metadata record's identifier).
    #[serde(rename = "_id")]
    pub name: String,

    /// User-facing identifier field for this collection.
    pub id_field: String,

    /// Materialized array indexes, in creation order.
    #[serde(default)]
    pub array_indexes: Vec<ArrayIndexMeta>,
}

impl CollectionMeta {
    /// Create a metadata record with no array indexes.
    pub fn new(name: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_field: id_field.into(),
            array_indexes: Vec::new(),
        }
    }
}

/// One materialized array index on a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayIndexMeta {
    /// JSON dot-path of the indexed array.
    pub keypath: String,

    /// Name of the side table holding the expansion.
    pub index_table: String,
}
