use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{StoreError, StoreResult};

/// Documents are schemaless JSON objects keyed by field name.
pub type FieldMap = serde_json::Map<String, JsonValue>;

/// Reserved identifier field present in every stored document.
pub const ID_FIELD: &str = "_id";

/// Builds a `FieldMap` from a literal JSON object. Panics on non-objects;
/// intended for static defaults tables and tests, where the literal shape is
/// fixed at compile time.
pub fn literal_fields(value: JsonValue) -> FieldMap {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("expected a JSON object literal, got {other}"),
    }
}

/// Addresses a document without loading it: collection name plus id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// Field-equality constraints evaluated atomically by the backing store as
/// part of a write. An empty condition matches any document.
#[derive(Debug, Clone, Default)]
pub struct Condition {
    fields: FieldMap,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Pins the condition to a single document id. Overrides any id
    /// constraint already present, which is the behavior conditional writes
    /// rely on: the caller-supplied condition never widens the target.
    pub fn with_id(mut self, id: &str) -> Self {
        self.fields
            .insert(ID_FIELD.to_owned(), JsonValue::String(id.to_owned()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The id this condition is pinned to, if any. Backends use it to avoid
    /// scanning a whole collection.
    pub fn id_constraint(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(JsonValue::as_str)
    }

    pub fn matches(&self, doc: &FieldMap) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

/// A store-interpreted change: set fields, integer increments, removals.
/// Applied atomically by the backend that executes it.
#[derive(Debug, Clone, Default)]
pub struct ChangeSpec {
    set: FieldMap,
    inc: Vec<(String, i64)>,
    unset: Vec<String>,
}

impl ChangeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_set(fields: FieldMap) -> Self {
        Self {
            set: fields,
            ..Self::default()
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn inc(mut self, field: impl Into<String>, delta: i64) -> Self {
        self.inc.push((field.into(), delta));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.inc.is_empty() && self.unset.is_empty()
    }

    /// The fields written by the `set` portion, used by callers that refresh
    /// a local cache from the change they just applied.
    pub fn set_fields(&self) -> &FieldMap {
        &self.set
    }

    /// Applies the change to `doc` in place. The id field is immutable;
    /// touching it is a programming error.
    pub fn apply(&self, doc: &mut FieldMap) -> StoreResult<()> {
        if self.touches_id() {
            return Err(StoreError::invalid_argument(
                "change specifications must not touch _id",
            ));
        }

        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }

        for (field, delta) in &self.inc {
            let base = match doc.get(field) {
                None | Some(JsonValue::Null) => 0,
                Some(JsonValue::Number(n)) => n.as_i64().ok_or_else(|| {
                    StoreError::invalid_argument(format!(
                        "cannot increment non-integer field {field}"
                    ))
                })?,
                Some(_) => {
                    return Err(StoreError::invalid_argument(format!(
                        "cannot increment non-numeric field {field}"
                    )));
                }
            };
            doc.insert(field.clone(), JsonValue::from(base + delta));
        }

        for field in &self.unset {
            doc.remove(field);
        }

        Ok(())
    }

    fn touches_id(&self) -> bool {
        self.set.contains_key(ID_FIELD)
            || self.inc.iter().any(|(field, _)| field == ID_FIELD)
            || self.unset.iter().any(|field| field == ID_FIELD)
    }
}

/// Counts reported by a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
}
