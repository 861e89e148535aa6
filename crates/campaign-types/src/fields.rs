//! Field-kind registry and value normalization.
//!
//! Records are opaque attribute maps, but filtering and indexing need to know
//! how to compare a field's values. The [`FieldRegistry`] assigns each
//! filterable field a [`FieldKind`], and [`FieldKind::normalize`] turns a
//! JSON scalar into the comparison key for that kind. Index keys and filter
//! operands go through the same function, so an index lookup and a linear
//! scan always agree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// How a field's values are compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Compared verbatim (after trimming surrounding whitespace).
    Exact,
    /// Lower-cased and trimmed before comparison.
    Categorical,
    /// Quarter labels: `"Q1 July"`, `"q1-july"` and `"Q1_July"` are equal.
    Quarter,
    /// Boolean checkbox; matched by truthiness.
    Flag,
    /// Keyword search over the listed source fields.
    FreeText {
        /// Record fields searched for each keyword.
        sources: Vec<String>,
    },
}

impl FieldKind {
    /// Return the comparison key for `value` under this kind.
    ///
    /// Strings, numbers and booleans produce a key. `null`, arrays and
    /// objects do not; callers expand arrays element by element.
    pub fn normalize(&self, value: &Value) -> Option<String> {
        let raw = scalar_text(value)?;
        let key = match self {
            Self::Exact => raw.trim().to_owned(),
            Self::Categorical | Self::FreeText { .. } => normalize_categorical(&raw),
            Self::Quarter => normalize_quarter(&raw),
            Self::Flag => is_truthy(value).to_string(),
        };
        Some(key)
    }

    /// Return whether this kind accepts keyword lists.
    pub const fn is_free_text(&self) -> bool {
        matches!(self, Self::FreeText { .. })
    }
}

/// Render a JSON scalar as text. Non-scalars yield `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Lower-case and trim a categorical value.
pub fn normalize_categorical(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Normalize a quarter label.
///
/// Lower-cases, then collapses every run of whitespace, `-` and `_` into a
/// single `-`, dropping leading and trailing separators.
pub fn normalize_quarter(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_sep = !out.is_empty();
            continue;
        }
        if pending_sep {
            out.push('-');
            pending_sep = false;
        }
        out.extend(ch.to_lowercase());
    }
    out
}

/// JavaScript-style truthiness, used for flag fields.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() > 0.0),
        Value::String(s) => {
            let t = s.trim();
            !(t.is_empty() || t.eq_ignore_ascii_case("false") || t == "0")
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps filterable field names to their [`FieldKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRegistry {
    kinds: BTreeMap<String, FieldKind>,
}

impl FieldRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            kinds: BTreeMap::new(),
        }
    }

    /// The registry used by the campaign planner UI.
    pub fn campaign_defaults() -> Self {
        let mut registry = Self::new();
        for field in ["region", "status", "owner", "country", "revenuePlay"] {
            registry.register(field, FieldKind::Categorical);
        }
        registry.register("programType", FieldKind::Categorical);
        registry.register("strategicPillars", FieldKind::Categorical);
        registry.register("quarter", FieldKind::Quarter);
        registry.register("fiscalYear", FieldKind::Exact);
        registry.register("digitalMotions", FieldKind::Flag);
        registry.register(
            "search",
            FieldKind::FreeText {
                sources: vec![
                    "campaignName".to_owned(),
                    "description".to_owned(),
                    "owner".to_owned(),
                ],
            },
        );
        registry
    }

    /// Register (or replace) the kind of `field`.
    pub fn register(&mut self, field: impl Into<String>, kind: FieldKind) -> &mut Self {
        self.kinds.insert(field.into(), kind);
        self
    }

    /// Look up the kind of `field`.
    pub fn kind(&self, field: &str) -> Option<&FieldKind> {
        self.kinds.get(field)
    }

    /// Kind of `field`, falling back to [`FieldKind::Exact`] when unknown.
    pub fn kind_or_exact(&self, field: &str) -> &FieldKind {
        self.kinds.get(field).unwrap_or(&FieldKind::Exact)
    }
}
