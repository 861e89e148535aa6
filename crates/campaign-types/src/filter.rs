//! Filter specification types.
//!
//! The filter UI hands over a loosely-shaped JSON object (field name to a
//! scalar, an array, a keyword string, or a checkbox flag). This module turns
//! that object into a [`FilterSpec`]: a map from field name to a tagged
//! [`FilterValue`], validated against a [`FieldRegistry`] so every predicate
//! is known to make sense for its field before any record is evaluated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::fields::{FieldKind, FieldRegistry, is_truthy, scalar_text};
use crate::structs::Record;

/// One field predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
    /// The field must equal this value (after normalization).
    Exact(Value),
    /// The field must equal any of these values (OR within the field).
    Membership(Vec<Value>),
    /// Every keyword must appear, case-insensitively, in the free-text sources.
    Keywords(Vec<String>),
    /// The field must be truthy. `false` means the checkbox is unchecked.
    Flag(bool),
}

impl FilterValue {
    /// Return whether this predicate constrains anything.
    ///
    /// Empty arrays, blank strings, `null`, empty keyword lists and an
    /// unchecked flag are inactive and skipped by the engine.
    pub fn is_active(&self) -> bool {
        match self {
            Self::Exact(v) => is_active_scalar(v),
            Self::Membership(values) => values.iter().any(is_active_scalar),
            Self::Keywords(words) => words.iter().any(|w| !w.trim().is_empty()),
            Self::Flag(on) => *on,
        }
    }

    /// Return the operand when the predicate tests a single value.
    ///
    /// `Exact(v)` and a `Membership` with exactly one active value qualify;
    /// these are the predicates the index can answer directly.
    pub fn single_value(&self) -> Option<&Value> {
        match self {
            Self::Exact(v) if is_active_scalar(v) => Some(v),
            Self::Membership(values) => {
                let mut active = values.iter().filter(|v| is_active_scalar(v));
                match (active.next(), active.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Evaluate this predicate against `record`'s value for `field`.
    ///
    /// Scalars and array elements are compared after normalization with
    /// `kind`, so an array-valued field matches when any element does.
    /// Keywords are matched as case-insensitive substrings of the free-text
    /// sources (the field itself when `kind` is not free text). A missing
    /// field never matches an active predicate.
    pub fn matches(&self, field: &str, kind: &FieldKind, record: &Record) -> bool {
        match self {
            Self::Exact(operand) => kind
                .normalize(operand)
                .is_some_and(|key| record_keys(kind, record.get(field)).any(|k| k == key)),
            Self::Membership(operands) => {
                let wanted: Vec<String> = operands
                    .iter()
                    .filter(|v| is_active_scalar(v))
                    .filter_map(|v| kind.normalize(v))
                    .collect();
                record_keys(kind, record.get(field)).any(|k| wanted.contains(&k))
            }
            Self::Keywords(words) => {
                let haystack = match kind {
                    FieldKind::FreeText { sources } => sources
                        .iter()
                        .filter_map(|source| record.get(source))
                        .flat_map(text_values)
                        .collect::<Vec<_>>(),
                    _ => record.get(field).map(text_values).unwrap_or_default(),
                };
                words
                    .iter()
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty())
                    .all(|word| haystack.iter().any(|text| text.contains(&word)))
            }
            Self::Flag(wanted) => !*wanted || record.get(field).is_some_and(is_truthy),
        }
    }
}

/// Normalized keys of a record value: one per scalar or array element.
fn record_keys<'a>(
    kind: &'a FieldKind,
    value: Option<&'a Value>,
) -> impl Iterator<Item = String> + 'a {
    let items: &[Value] = match value {
        Some(Value::Array(items)) => items,
        Some(scalar) => std::slice::from_ref(scalar),
        None => &[],
    };
    items.iter().filter_map(move |item| kind.normalize(item))
}

/// Lower-cased text of a scalar or of each element of an array.
fn text_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_text)
            .map(|t| t.to_lowercase())
            .collect(),
        other => scalar_text(other)
            .map(|t| vec![t.to_lowercase()])
            .unwrap_or_default(),
    }
}

fn is_active_scalar(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Reasons a UI filter object is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterSpecError {
    /// The filter must be a JSON object (or `null` for "no filter").
    #[error("filter specification must be an object, got {found}")]
    NotAnObject {
        /// JSON type that was supplied instead.
        found: &'static str,
    },

    /// The field is not in the registry.
    #[error("unknown filter field `{field}`")]
    UnknownField {
        /// The offending field name.
        field: String,
    },

    /// The value's shape does not fit the field's kind.
    #[error("filter field `{field}` expects {expected}, got {found}")]
    ShapeMismatch {
        /// The offending field name.
        field: String,
        /// What the field kind accepts.
        expected: &'static str,
        /// JSON type that was supplied.
        found: &'static str,
    },
}

/// A validated filter specification: all active predicates combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    predicates: BTreeMap<String, FilterValue>,
}

impl FilterSpec {
    /// An empty specification (matches every active record).
    pub const fn new() -> Self {
        Self {
            predicates: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: FilterValue) -> Self {
        self.predicates.insert(field.into(), value);
        self
    }

    /// Insert or replace the predicate for `field`.
    pub fn insert(&mut self, field: impl Into<String>, value: FilterValue) {
        self.predicates.insert(field.into(), value);
    }

    /// Look up the predicate for `field`.
    pub fn get(&self, field: &str) -> Option<&FilterValue> {
        self.predicates.get(field)
    }

    /// Iterate over the predicates that actually constrain, in field order.
    pub fn active(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.predicates
            .iter()
            .filter(|(_, value)| value.is_active())
            .map(|(field, value)| (field.as_str(), value))
    }

    /// Return whether no predicate is active.
    pub fn is_empty(&self) -> bool {
        self.active().next().is_none()
    }

    /// Number of active predicates.
    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Return whether `record` satisfies every active predicate.
    ///
    /// Fields missing from `registry` are compared as
    /// [`FieldKind::Exact`].
    pub fn matches(&self, record: &Record, registry: &FieldRegistry) -> bool {
        self.active()
            .all(|(field, value)| value.matches(field, registry.kind_or_exact(field), record))
    }

    /// Parse the UI's duck-typed filter object.
    ///
    /// Shapes accepted per field kind:
    ///
    /// | Kind | Accepted |
    /// |------|----------|
    /// | free text | string (split on whitespace) or array of strings |
    /// | flag | boolean, or a string/number read by truthiness |
    /// | others | scalar (exact) or array of scalars (membership) |
    ///
    /// `null` values are skipped; a `null` specification is empty.
    ///
    /// # Errors
    ///
    /// Returns [`FilterSpecError`] for a non-object specification, a field
    /// missing from `registry`, or a value whose shape does not fit.
    pub fn from_json(value: &Value, registry: &FieldRegistry) -> Result<Self, FilterSpecError> {
        let object = match value {
            Value::Null => return Ok(Self::new()),
            Value::Object(object) => object,
            other => {
                return Err(FilterSpecError::NotAnObject {
                    found: json_type(other),
                });
            }
        };

        let mut spec = Self::new();
        for (field, raw) in object {
            let kind = registry
                .kind(field)
                .ok_or_else(|| FilterSpecError::UnknownField {
                    field: field.clone(),
                })?;
            if raw.is_null() {
                continue;
            }
            let predicate = parse_predicate(field, kind, raw)?;
            spec.predicates.insert(field.clone(), predicate);
        }
        Ok(spec)
    }
}

fn parse_predicate(
    field: &str,
    kind: &FieldKind,
    raw: &Value,
) -> Result<FilterValue, FilterSpecError> {
    let mismatch = |expected: &'static str| FilterSpecError::ShapeMismatch {
        field: field.to_owned(),
        expected,
        found: json_type(raw),
    };

    match kind {
        FieldKind::FreeText { .. } => match raw {
            Value::String(text) => Ok(FilterValue::Keywords(
                text.split_whitespace().map(str::to_owned).collect(),
            )),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(|s| s.trim().to_owned())
                        .ok_or_else(|| mismatch("a keyword string or array of strings"))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(FilterValue::Keywords),
            _ => Err(mismatch("a keyword string or array of strings")),
        },
        FieldKind::Flag => match raw {
            Value::Bool(on) => Ok(FilterValue::Flag(*on)),
            Value::String(_) | Value::Number(_) => Ok(FilterValue::Flag(is_truthy(raw))),
            _ => Err(mismatch("a boolean")),
        },
        FieldKind::Exact | FieldKind::Categorical | FieldKind::Quarter => match raw {
            Value::Array(items) => {
                if items.iter().any(|v| v.is_array() || v.is_object()) {
                    return Err(mismatch("a scalar or array of scalars"));
                }
                Ok(FilterValue::Membership(items.clone()))
            }
            Value::Object(_) => Err(mismatch("a scalar or array of scalars")),
            scalar => Ok(FilterValue::Exact(scalar.clone())),
        },
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> FieldRegistry {
        FieldRegistry::campaign_defaults()
    }

    #[test]
    fn parses_each_shape() {
        let spec = FilterSpec::from_json(
            &json!({
                "region": ["EMEA", "APAC"],
                "quarter": "Q1 July",
                "search": "launch  webinar",
                "digitalMotions": true,
            }),
            &registry(),
        );
        let spec = spec.unwrap_or_default();
        assert_eq!(
            spec.get("region"),
            Some(&FilterValue::Membership(vec![json!("EMEA"), json!("APAC")]))
        );
        assert_eq!(spec.get("quarter"), Some(&FilterValue::Exact(json!("Q1 July"))));
        assert_eq!(
            spec.get("search"),
            Some(&FilterValue::Keywords(vec![
                "launch".to_owned(),
                "webinar".to_owned()
            ]))
        );
        assert_eq!(spec.get("digitalMotions"), Some(&FilterValue::Flag(true)));
        assert_eq!(spec.active_count(), 4);
    }

    #[test]
    fn empty_values_are_inactive() {
        let spec = FilterSpec::from_json(
            &json!({
                "region": [],
                "status": "  ",
                "search": "",
                "digitalMotions": false,
                "owner": null,
            }),
            &registry(),
        );
        assert!(spec.is_ok_and(|s| s.is_empty()));
    }

    #[test]
    fn null_spec_is_empty() {
        assert!(FilterSpec::from_json(&Value::Null, &registry()).is_ok_and(|s| s.is_empty()));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = FilterSpec::from_json(&json!({"colour": "red"}), &registry());
        assert_eq!(
            err,
            Err(FilterSpecError::UnknownField {
                field: "colour".to_owned()
            })
        );
    }

    #[test]
    fn rejects_shape_mismatches() {
        let err = FilterSpec::from_json(&json!({"digitalMotions": ["yes"]}), &registry());
        assert!(matches!(err, Err(FilterSpecError::ShapeMismatch { .. })));

        let err = FilterSpec::from_json(&json!({"region": {"in": ["EMEA"]}}), &registry());
        assert!(matches!(err, Err(FilterSpecError::ShapeMismatch { .. })));

        let err = FilterSpec::from_json(&json!(["EMEA"]), &registry());
        assert_eq!(err, Err(FilterSpecError::NotAnObject { found: "array" }));
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => Record::from_object(map),
            _ => Record::default(),
        }
    }

    #[test]
    fn membership_normalizes_and_matches_array_elements() {
        let reg = registry();
        let row = record(json!({"quarter": "q1-july", "strategicPillars": ["Growth ", "Retention"]}));
        let quarter = FilterValue::Membership(vec![json!("Q1 July")]);
        assert!(quarter.matches("quarter", reg.kind_or_exact("quarter"), &row));
        let pillar = FilterValue::Membership(vec![json!("retention"), json!("churn")]);
        assert!(pillar.matches("strategicPillars", reg.kind_or_exact("strategicPillars"), &row));
        let missing = FilterValue::Exact(json!("EMEA"));
        assert!(!missing.matches("region", reg.kind_or_exact("region"), &row));
    }

    #[test]
    fn keywords_need_every_word_in_some_source() {
        let reg = registry();
        let kind = reg.kind_or_exact("search");
        let row = record(json!({"campaignName": "Spring Launch", "description": "Partner webinar"}));
        let hit = FilterValue::Keywords(vec!["launch".to_owned(), "WEBINAR".to_owned()]);
        assert!(hit.matches("search", kind, &row));
        let miss = FilterValue::Keywords(vec!["launch".to_owned(), "gala".to_owned()]);
        assert!(!miss.matches("search", kind, &row));
    }

    #[test]
    fn spec_combines_fields_with_and() {
        let reg = registry();
        let spec = FilterSpec::new()
            .with("region", FilterValue::Membership(vec![json!("EMEA")]))
            .with("digitalMotions", FilterValue::Flag(true));
        assert!(spec.matches(&record(json!({"region": "emea", "digitalMotions": true})), &reg));
        assert!(!spec.matches(&record(json!({"region": "EMEA", "digitalMotions": false})), &reg));
        assert!(FilterSpec::new().matches(&record(json!({})), &reg));
    }

    #[test]
    fn single_value_only_for_one_operand() {
        assert_eq!(
            FilterValue::Membership(vec![json!("EMEA"), json!("")]).single_value(),
            Some(&json!("EMEA"))
        );
        assert_eq!(
            FilterValue::Membership(vec![json!("EMEA"), json!("APAC")]).single_value(),
            None
        );
        assert_eq!(FilterValue::Exact(json!("x")).single_value(), Some(&json!("x")));
        assert_eq!(FilterValue::Flag(true).single_value(), None);
    }
}
