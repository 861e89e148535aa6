//! Bounded audit trail of store mutations.
//!
//! The [`ChangeLog`] is a ring buffer: once it holds `capacity` entries, each
//! new entry evicts the oldest. It exists for debugging and audit only; the
//! store never reads it back to reconstruct state.

use std::collections::VecDeque;

use chrono::Utc;

use campaign_types::{ChangeAction, ChangeLogEntry, Record, RecordId};

/// Default number of entries retained.
pub const DEFAULT_CHANGE_LOG_CAPACITY: usize = 100;

/// Ring buffer of [`ChangeLogEntry`] values, oldest first.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    entries: VecDeque<ChangeLogEntry>,
    capacity: usize,
}

impl ChangeLog {
    /// Create an empty log holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry stamped with the current time, evicting the oldest
    /// entries when full. A zero-capacity log records nothing.
    pub fn record(
        &mut self,
        action: ChangeAction,
        id: Option<RecordId>,
        before: Option<Record>,
        after: Option<Record>,
    ) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ChangeLogEntry {
            timestamp: Utc::now(),
            action,
            id,
            before,
            after,
        });
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries held.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ChangeLogEntry> {
        self.entries.iter()
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_LOG_CAPACITY)
    }
}
