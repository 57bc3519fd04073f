//! Span attributes: well-known keys and the keyed merge set.
//!
//! Keys and values are OpenTelemetry's own [`Key`] and [`Value`]. The stable
//! `server.*` keys come from `opentelemetry-semantic-conventions`; the
//! database keys, including the legacy ones the tracer accepts, are declared
//! here.

use opentelemetry::{Key, KeyValue, Value};

pub use opentelemetry_semantic_conventions::attribute::{SERVER_ADDRESS, SERVER_PORT};

/// Database management system identifier.
pub const DB_SYSTEM: &str = "db.system";
/// Logical database name (legacy convention).
pub const DB_NAME: &str = "db.name";
/// Logical database name (current convention).
pub const DB_NAMESPACE: &str = "db.namespace";
/// Primary table of the operation (legacy convention).
pub const DB_SQL_TABLE: &str = "db.sql.table";
/// Primary table of the operation (current convention).
pub const DB_COLLECTION_NAME: &str = "db.collection.name";
/// Operation name, e.g. `SELECT`.
pub const DB_OPERATION: &str = "db.operation";
/// Captured statement text.
pub const DB_STATEMENT: &str = "db.statement";
/// Rows returned or affected.
pub const DB_ROWS_AFFECTED: &str = "db.rows_affected";
/// User the connection authenticates as.
pub const DB_USER: &str = "db.user";
/// Connection descriptor without credentials.
pub const DB_CONNECTION_STRING: &str = "db.connection_string";

/// Keys accepted for carrying the database name.
pub const DB_NAME_KEYS: [&str; 2] = [DB_NAME, DB_NAMESPACE];

/// Keys accepted for carrying the table name.
pub const TABLE_KEYS: [&str; 2] = [DB_SQL_TABLE, DB_COLLECTION_NAME];

fn is_empty_str(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.as_str().is_empty())
}

/// Insertion-ordered attributes keyed by name.
///
/// Re-inserting a key replaces its value in place. Empty strings are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    entries: Vec<KeyValue>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        self.push(KeyValue::new(key, value));
    }

    pub fn push(&mut self, attribute: KeyValue) {
        if is_empty_str(&attribute.value) {
            return;
        }
        match self.entries.iter_mut().find(|kv| kv.key == attribute.key) {
            Some(existing) => existing.value = attribute.value,
            None => self.entries.push(attribute),
        }
    }

    /// Overlay every attribute of `other`, in its order.
    pub fn merge(&mut self, other: &AttributeSet) {
        for attribute in &other.entries {
            self.push(attribute.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    /// The value under `key` when it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
