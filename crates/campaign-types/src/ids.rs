//! Type-safe record identifier.
//!
//! Campaign records carry string identifiers because they arrive from an
//! external backing store that may use any scheme. When a record arrives
//! without an identifier the store assigns one with [`RecordId::generate`],
//! which produces a UUID v7 string (time-ordered, so generated ids sort by
//! creation time).

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

/// Unique identifier for a campaign record.
///
/// A blank identifier (empty or whitespace only) is treated as absent by the
/// store and replaced with a generated one.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create an identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier using UUID v7.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Read an identifier out of a JSON value.
    ///
    /// Strings are used as-is (trimmed) and numbers are rendered in their
    /// decimal form. Anything else, and blank strings, yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_owned())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Return the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return whether the identifier is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
