//! The master record store.
//!
//! [`DataStore`] owns the master collection of campaign records in insertion
//! order, the per-record lifecycle status (which is the deleted set), and the
//! bounded [`ChangeLog`]. Every mutation is announced on the injected
//! [`EventBus`].
//!
//! # Design
//!
//! - **Arena + index**: records live in a `Vec`; an id → position map gives
//!   O(1) lookup. A purge shifts positions, so the map is rebuilt then.
//! - **Status, not side-table**: soft-deleted records carry
//!   [`Lifecycle::Deleted`]. The deleted set is derived, so a record can
//!   never be both active and deleted.
//! - **Atomic mutations**: each mutation takes the write lock, validates,
//!   applies, bumps the version, and appends one change-log entry before the
//!   lock is released. Failed validation leaves the state untouched.
//! - **Publish after unlock**: the event is published only after the lock is
//!   dropped, so subscribers may read the store from inside their callback.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use campaign_events::EventBus;
use campaign_types::{
    ChangeAction, ChangeLogEntry, Event, Lifecycle, LifecycleAction, Record, RecordId, StoreStats,
};

use crate::StoreError;
use crate::changelog::{ChangeLog, DEFAULT_CHANGE_LOG_CAPACITY};

/// Default number of records prepared per chunk by
/// [`DataStore::import_chunked`].
pub const DEFAULT_IMPORT_CHUNK_SIZE: usize = 250;

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoreState {
    records: Vec<Record>,
    positions: HashMap<RecordId, usize>,
    change_log: ChangeLog,
    version: u64,
}

impl StoreState {
    fn new(change_log_capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            positions: HashMap::new(),
            change_log: ChangeLog::new(change_log_capacity),
            version: 0,
        }
    }

    fn reindex(&mut self) {
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.id.clone(), pos))
            .collect();
    }

    fn record_mut(&mut self, id: &str) -> Option<&mut Record> {
        let pos = *self.positions.get(id)?;
        self.records.get_mut(pos)
    }

    fn bump(&mut self) -> u64 {
        self.version = self.version.saturating_add(1);
        self.version
    }

    fn stats(&self) -> StoreStats {
        let deleted = self
            .records
            .iter()
            .filter(|r| r.status.is_deleted())
            .count();
        StoreStats {
            master: self.records.len(),
            active: self.records.len().saturating_sub(deleted),
            deleted,
            change_log: self.change_log.len(),
            version: self.version,
        }
    }
}

/// Give every record a unique, non-blank id.
///
/// `taken` holds ids already in use; it is extended with every id handed
/// out. Blank ids are generated; colliding ids are regenerated with a
/// warning.
fn assign_ids(records: &mut [Record], taken: &mut HashSet<RecordId>) {
    for record in records {
        if record.id.is_blank() {
            record.id = RecordId::generate();
        } else if taken.contains(&record.id) {
            let replacement = RecordId::generate();
            warn!(
                duplicate = %record.id,
                replacement = %replacement,
                "duplicate record id, assigned a fresh one"
            );
            record.id = replacement;
        }
        taken.insert(record.id.clone());
    }
}

/// Split a JSON value into records.
///
/// # Errors
///
/// Returns [`StoreError::Validation`] when `value` is not an array.
pub fn parse_records(value: Value) -> Result<Vec<Record>, StoreError> {
    let Value::Array(items) = value else {
        return Err(StoreError::Validation {
            reason: format!("expected an array of records, got {}", json_type(&value)),
        });
    };
    let mut records = Vec::with_capacity(items.len());
    for (position, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(fields) => records.push(Record::from_object(fields)),
            other => warn!(
                position,
                found = json_type(&other),
                "skipping non-object record"
            ),
        }
    }
    Ok(records)
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

// ---------------------------------------------------------------------------
// DataStore
// ---------------------------------------------------------------------------

/// The master campaign record store.
///
/// Cheap to clone; clones share the same collection.
#[derive(Debug, Clone)]
pub struct DataStore {
    state: Arc<RwLock<StoreState>>,
    bus: EventBus,
}

impl DataStore {
    /// Create an empty store publishing on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self::with_change_log_capacity(bus, DEFAULT_CHANGE_LOG_CAPACITY)
    }

    /// Create an empty store whose change log keeps `capacity` entries.
    pub fn with_change_log_capacity(bus: EventBus, capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::new(capacity))),
            bus,
        }
    }

    /// The bus this store publishes on.
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Bulk load
    // -----------------------------------------------------------------------

    /// Replace the entire master collection.
    ///
    /// Clears the deleted set and the change log, assigns ids to records
    /// without one, resets every `modified` flag, and publishes
    /// `DATA_LOADED`. Returns the number of records loaded.
    pub fn set_data(&self, records: Vec<Record>) -> usize {
        let mut records = records;
        for record in &mut records {
            record.status = Lifecycle::Active;
            record.modified = false;
        }
        assign_ids(&mut records, &mut HashSet::new());

        let (count, version) = {
            let mut state = self.write();
            state.records = records;
            state.reindex();
            state.change_log.clear();
            let version = state.bump();
            (state.records.len(), version)
        };

        info!(count, version, "master collection loaded");
        self.bus.publish(&Event::DataLoaded { count, version });
        count
    }

    /// [`set_data`](Self::set_data) from an untyped JSON value.
    ///
    /// A non-array is logged and loaded as an empty collection; non-object
    /// elements are skipped.
    pub fn set_data_json(&self, value: Value) -> usize {
        let records = parse_records(value).unwrap_or_else(|err| {
            warn!(error = %err, "invalid dataset, loading an empty collection");
            Vec::new()
        });
        self.set_data(records)
    }

    /// Append `records` after preparing them in chunks of `chunk_size`.
    ///
    /// Id assignment and duplicate resolution run chunk by chunk in FIFO
    /// order, yielding to the scheduler between chunks so a host event loop
    /// stays responsive. The prepared batch is then appended in one step
    /// with one `DATA_UPDATED{action:"import"}` event and one change-log
    /// entry; readers never observe a half-imported batch. Imported records
    /// are active and marked modified. Returns the number appended.
    pub async fn import_chunked(&self, records: Vec<Record>, chunk_size: usize) -> usize {
        if records.is_empty() {
            return 0;
        }
        let chunk_size = chunk_size.max(1);
        let mut taken: HashSet<RecordId> = self.read().positions.keys().cloned().collect();

        let mut prepared = Vec::with_capacity(records.len());
        let mut pending = records.into_iter().peekable();
        let mut chunks: usize = 0;
        while pending.peek().is_some() {
            let mut chunk: Vec<Record> = pending.by_ref().take(chunk_size).collect();
            for record in &mut chunk {
                record.status = Lifecycle::Active;
                record.modified = true;
            }
            assign_ids(&mut chunk, &mut taken);
            prepared.append(&mut chunk);
            chunks = chunks.saturating_add(1);
            debug!(chunk = chunks, prepared = prepared.len(), "import chunk prepared");
            tokio::task::yield_now().await;
        }

        let (count, version) = {
            let mut state = self.write();
            // The store may have changed while we yielded.
            let mut live: HashSet<RecordId> = state.positions.keys().cloned().collect();
            for record in &mut prepared {
                if live.contains(&record.id) {
                    record.id = RecordId::generate();
                }
                live.insert(record.id.clone());
            }
            let count = prepared.len();
            state.records.append(&mut prepared);
            state.reindex();
            let version = state.bump();
            state
                .change_log
                .record(ChangeAction::Import, None, None, None);
            (count, version)
        };

        info!(count, chunks, version, "bulk import applied");
        self.bus.publish(&Event::DataUpdated {
            action: ChangeAction::Import,
            id: None,
            version,
        });
        count
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Active records (master minus deleted), in insertion order.
    pub fn get_data(&self) -> Vec<Record> {
        self.read()
            .records
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    /// Active records together with the version they were read at.
    ///
    /// Both come from one read lock, so the pair is consistent.
    pub fn active_snapshot(&self) -> (Vec<Record>, u64) {
        let state = self.read();
        let active = state
            .records
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        (active, state.version)
    }

    /// Every record, including soft-deleted ones, in insertion order.
    pub fn get_master_data(&self) -> Vec<Record> {
        self.read().records.clone()
    }

    /// Look up one record by id, whatever its status.
    pub fn get_row(&self, id: &str) -> Option<Record> {
        let state = self.read();
        let pos = *state.positions.get(id)?;
        state.records.get(pos).cloned()
    }

    /// Ids of soft-deleted records, in insertion order.
    pub fn deleted_ids(&self) -> Vec<RecordId> {
        self.read()
            .records
            .iter()
            .filter(|r| r.status.is_deleted())
            .map(|r| r.id.clone())
            .collect()
    }

    /// Return whether `id` is currently soft-deleted.
    pub fn is_deleted(&self, id: &str) -> bool {
        let state = self.read();
        state
            .positions
            .get(id)
            .and_then(|pos| state.records.get(*pos))
            .is_some_and(|r| r.status.is_deleted())
    }

    /// Records changed locally since the last load or sync.
    pub fn modified_rows(&self) -> Vec<Record> {
        self.read()
            .records
            .iter()
            .filter(|r| r.modified)
            .cloned()
            .collect()
    }

    /// Change-log entries, oldest first.
    pub fn change_log(&self) -> Vec<ChangeLogEntry> {
        self.read().change_log.iter().cloned().collect()
    }

    /// Counters for observability.
    pub fn get_stats(&self) -> StoreStats {
        self.read().stats()
    }

    /// Monotonic version, bumped by every load and mutation.
    pub fn version(&self) -> u64 {
        self.read().version
    }

    /// Number of records in the master collection.
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    /// Return whether the master collection is empty.
    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Append a record built from a JSON object.
    ///
    /// See [`add_record`](Self::add_record).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] if `data` names an id already in
    /// the master collection.
    pub fn add_row(&self, data: Map<String, Value>) -> Result<RecordId, StoreError> {
        self.add_record(Record::from_object(data))
    }

    /// Append `record` to the master collection.
    ///
    /// Assigns an id if the record has none, marks it active and modified,
    /// logs `add`, and publishes `DATA_UPDATED{action:"add"}`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] if the record's id is already in
    /// use; nothing changes and nothing is published.
    pub fn add_record(&self, record: Record) -> Result<RecordId, StoreError> {
        let mut record = record;
        if record.id.is_blank() {
            record.id = RecordId::generate();
        }
        record.status = Lifecycle::Active;
        record.modified = true;
        let id = record.id.clone();

        let version = {
            let mut state = self.write();
            if state.positions.contains_key(&id) {
                warn!(id = %id, "add rejected: duplicate id");
                return Err(StoreError::DuplicateId { id });
            }
            let pos = state.records.len();
            state.positions.insert(id.clone(), pos);
            state
                .change_log
                .record(ChangeAction::Add, Some(id.clone()), None, Some(record.clone()));
            state.records.push(record);
            state.bump()
        };

        debug!(id = %id, version, "record added");
        self.publish_update(ChangeAction::Add, &id, version);
        Ok(id)
    }

    /// Merge `partial` into the record `id` and mark it modified.
    ///
    /// Returns `false` (with a warning) if `id` is unknown.
    pub fn update_row(&self, id: &str, partial: &Map<String, Value>) -> bool {
        self.try_update_row(id, partial)
            .inspect_err(|err| warn!(error = %err, "update skipped"))
            .is_ok()
    }

    /// [`update_row`](Self::update_row) returning the updated record.
    ///
    /// An `id` key inside `partial` is ignored; ids are immutable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `id` is unknown.
    pub fn try_update_row(
        &self,
        id: &str,
        partial: &Map<String, Value>,
    ) -> Result<Record, StoreError> {
        let (after, version) = {
            let mut state = self.write();
            let record = state
                .record_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.into() })?;
            let before = record.clone();
            record.merge(partial);
            record.modified = true;
            let after = record.clone();
            state.change_log.record(
                ChangeAction::Update,
                Some(after.id.clone()),
                Some(before),
                Some(after.clone()),
            );
            (after, state.bump())
        };

        debug!(id = %after.id, version, "record updated");
        self.publish_update(ChangeAction::Update, &after.id, version);
        Ok(after)
    }

    /// Soft-delete the active record `id`.
    ///
    /// Returns `false` (with a warning) if `id` is unknown or already
    /// deleted.
    pub fn delete_row(&self, id: &str) -> bool {
        self.transition_logged(id, LifecycleAction::Delete)
    }

    /// Restore the soft-deleted record `id`.
    ///
    /// Returns `false` (with a warning) if `id` is unknown or not deleted;
    /// the store is left unchanged.
    pub fn restore_row(&self, id: &str) -> bool {
        self.transition_logged(id, LifecycleAction::Restore)
    }

    /// Remove the soft-deleted record `id` for good.
    ///
    /// Only a deleted record can be purged; an active id returns `false`.
    pub fn permanently_delete_row(&self, id: &str) -> bool {
        self.transition_logged(id, LifecycleAction::Purge)
    }

    fn transition_logged(&self, id: &str, action: LifecycleAction) -> bool {
        self.transition(id, action)
            .inspect_err(|err| warn!(error = %err, ?action, "lifecycle change skipped"))
            .is_ok()
    }

    /// Apply a lifecycle move to record `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id and
    /// [`StoreError::InvalidTransition`] for a move the lifecycle forbids.
    pub fn transition(&self, id: &str, action: LifecycleAction) -> Result<Lifecycle, StoreError> {
        let (change, record_id, next, version) = {
            let mut state = self.write();
            let pos = *state
                .positions
                .get(id)
                .ok_or_else(|| StoreError::NotFound { id: id.into() })?;
            let record = state
                .records
                .get_mut(pos)
                .ok_or_else(|| StoreError::NotFound { id: id.into() })?;
            let next = record
                .status
                .apply(action)
                .map_err(|source| StoreError::InvalidTransition {
                    id: record.id.clone(),
                    source,
                })?;

            let before = record.clone();
            let record_id = before.id.clone();
            let (change, after) = match next {
                Lifecycle::Purged => {
                    state.records.remove(pos);
                    state.reindex();
                    (ChangeAction::PermanentDelete, None)
                }
                Lifecycle::Deleted => {
                    record.status = next;
                    (ChangeAction::Delete, Some(record.clone()))
                }
                Lifecycle::Active => {
                    record.status = next;
                    (ChangeAction::Restore, Some(record.clone()))
                }
            };
            state
                .change_log
                .record(change, Some(record_id.clone()), Some(before), after);
            (change, record_id, next, state.bump())
        };

        debug!(id = %record_id, action = %change, version, "lifecycle changed");
        self.publish_update(change, &record_id, version);
        Ok(next)
    }

    /// Clear the `modified` flag on every record after a successful push.
    ///
    /// Bookkeeping only: not a mutation, so nothing is logged or published.
    /// Returns how many records were flagged.
    pub fn mark_synced(&self) -> usize {
        let mut state = self.write();
        let mut cleared: usize = 0;
        for record in state.records.iter_mut().filter(|r| r.modified) {
            record.modified = false;
            cleared = cleared.saturating_add(1);
        }
        cleared
    }

    fn publish_update(&self, action: ChangeAction, id: &RecordId, version: u64) {
        self.bus.publish(&Event::DataUpdated {
            action,
            id: Some(id.clone()),
            version,
        });
    }
}
