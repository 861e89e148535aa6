//! Typed payloads carried by the event bus.
//!
//! Each [`Event`] variant belongs to exactly one [`Topic`]; publishing an
//! event delivers it to the subscribers of `event.topic()`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enums::{ChangeAction, Topic};
use crate::filter::FilterSpec;
use crate::ids::RecordId;

/// A notification published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// `DATA_LOADED`: the master collection was replaced.
    DataLoaded {
        /// Number of records now in the master collection.
        count: usize,
        /// Store version after the load.
        version: u64,
    },

    /// `DATA_UPDATED`: one mutation was applied.
    DataUpdated {
        /// What changed.
        action: ChangeAction,
        /// Affected record; `None` for a bulk import.
        id: Option<RecordId>,
        /// Store version after the mutation.
        version: u64,
    },

    /// `UI_FILTER_CHANGED`: the filter UI produced a new specification.
    UiFilterChanged {
        /// The validated specification.
        spec: FilterSpec,
    },

    /// `FILTERS_APPLIED`: a filter pass finished.
    FiltersApplied {
        /// Records that matched.
        matched: usize,
        /// Records the pass started from.
        total: usize,
        /// Wall time spent in the pass.
        elapsed: Duration,
    },

    /// `INDEXES_REBUILT`: secondary indexes were rebuilt.
    IndexesRebuilt {
        /// Indexed field names.
        fields: Vec<String>,
        /// Records in the snapshot the indexes were built from.
        records: usize,
        /// Store version of that snapshot.
        version: u64,
    },

    /// `PERFORMANCE_WARNING`: an operation ran over its time budget.
    PerformanceWarning {
        /// Operation that ran long (e.g. `"filter"`).
        operation: String,
        /// Wall time spent.
        elapsed: Duration,
        /// The configured budget.
        threshold: Duration,
        /// Records the operation processed.
        record_count: usize,
    },
}

impl Event {
    /// Return the topic this event is published on.
    pub const fn topic(&self) -> Topic {
        match self {
            Self::DataLoaded { .. } => Topic::DataLoaded,
            Self::DataUpdated { .. } => Topic::DataUpdated,
            Self::UiFilterChanged { .. } => Topic::UiFilterChanged,
            Self::FiltersApplied { .. } => Topic::FiltersApplied,
            Self::IndexesRebuilt { .. } => Topic::IndexesRebuilt,
            Self::PerformanceWarning { .. } => Topic::PerformanceWarning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_matches_variant() {
        let event = Event::DataUpdated {
            action: ChangeAction::Add,
            id: Some(RecordId::new("c-1")),
            version: 3,
        };
        assert_eq!(event.topic(), Topic::DataUpdated);
        assert_eq!(
            Event::UiFilterChanged {
                spec: FilterSpec::new()
            }
            .topic(),
            Topic::UiFilterChanged
        );
    }

    #[test]
    fn serialized_tag_is_wire_topic_name() {
        let event = Event::DataLoaded {
            count: 2,
            version: 1,
        };
        let value = serde_json::to_value(&event).ok();
        let tag = value
            .as_ref()
            .and_then(|v| v.get("topic"))
            .and_then(|t| t.as_str())
            .map(str::to_owned);
        assert_eq!(tag.as_deref(), Some(Topic::DataLoaded.as_str()));
    }
}
