//! Core record and bookkeeping structs.
//!
//! Covers the campaign [`Record`], the [`ChangeLogEntry`] kept by the store's
//! audit ring, and the [`StoreStats`] counters exposed for observability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::enums::{ChangeAction, Lifecycle};
use crate::ids::RecordId;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Reserved key for the record identifier in the JSON shape.
pub const ID_KEY: &str = "id";

/// Reserved key for the sync bookkeeping flag in the JSON shape.
pub const MODIFIED_KEY: &str = "modified";

/// One campaign entity.
///
/// Serializes as a flat JSON object: `id` first, followed by the opaque
/// domain attributes. `status` and `modified` are store bookkeeping and are
/// never read from incoming JSON; a record built from JSON starts `Active`
/// and unmodified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct Record {
    /// Unique identifier. Blank means "not yet assigned".
    pub id: RecordId,
    /// Lifecycle state; the master collection only holds `Active` or `Deleted`.
    #[serde(skip)]
    pub status: Lifecycle,
    /// Set on every local add/update, cleared by a load or a sync.
    #[serde(skip)]
    pub modified: bool,
    /// Opaque domain attributes (region, quarter, owner, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create an active, unmodified record with the given fields.
    ///
    /// Reserved keys (`id`, `modified`) in `fields` are dropped.
    pub fn new(id: RecordId, mut fields: Map<String, Value>) -> Self {
        fields.remove(ID_KEY);
        fields.remove(MODIFIED_KEY);
        Self {
            id,
            status: Lifecycle::Active,
            modified: false,
            fields,
        }
    }

    /// Build a record from a JSON object.
    ///
    /// The `id` key becomes [`Record::id`] (blank when missing or not a
    /// string/number) and the `modified` key is dropped.
    pub fn from_object(mut fields: Map<String, Value>) -> Self {
        let id = fields
            .remove(ID_KEY)
            .and_then(|v| RecordId::from_json(&v))
            .unwrap_or_default();
        Self::new(id, fields)
    }

    /// Read a domain attribute.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a domain attribute. Reserved keys are ignored.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if field == ID_KEY || field == MODIFIED_KEY {
            return;
        }
        self.fields.insert(field, value);
    }

    /// Merge `partial` into the record's attributes.
    ///
    /// Keys in `partial` overwrite existing attributes; reserved keys are
    /// skipped so an update can never re-key a record.
    pub fn merge(&mut self, partial: &Map<String, Value>) {
        for (key, value) in partial {
            self.set(key.clone(), value.clone());
        }
    }

    /// Return whether the record is in the active view.
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_object(fields)
    }
}

// ---------------------------------------------------------------------------
// Change log
// ---------------------------------------------------------------------------

/// One entry in the store's bounded audit ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// When the mutation was applied.
    pub timestamp: DateTime<Utc>,
    /// What kind of mutation it was.
    pub action: ChangeAction,
    /// The affected record (`None` for a bulk import).
    pub id: Option<RecordId>,
    /// Record state before the mutation, if it existed.
    pub before: Option<Record>,
    /// Record state after the mutation, if it still exists.
    pub after: Option<Record>,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Store counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Records in the master collection (active and deleted).
    pub master: usize,
    /// Records in the active view.
    pub active: usize,
    /// Soft-deleted records.
    pub deleted: usize,
    /// Entries currently held by the change log.
    pub change_log: usize,
    /// Current store version.
    pub version: u64,
}
