use lectern_core::FieldMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{HandlerError, Prerequisite};

/// A routed wire message: a `type` tag plus an open set of payload fields.
///
/// Payload field names must not collide with `type`; that key is the routing
/// tag and is carried separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    fields: FieldMap,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: FieldMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.fields.get(name)
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(JsonValue::as_str)
    }

    /// Reads a payload field that must be present and must be a string.
    pub fn require_str(&self, name: &str) -> Result<&str, HandlerError> {
        self.opt_str(name)
            .ok_or_else(|| HandlerError::malformed(name))
    }

    pub fn malformed_notice(offending: Option<&str>, field: &str) -> Self {
        let notice = Message::new("error.malformedMessage").with("missingField", field);
        match offending {
            Some(kind) => notice.with("offendingType", kind),
            None => notice,
        }
    }

    pub fn not_ready_notice(missing: Prerequisite) -> Self {
        Message::new("session.notReady").with("missing", missing.as_str())
    }
}
