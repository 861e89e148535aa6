//! Enumeration types shared across the campaign workspace.
//!
//! Record lifecycle, change-log actions, and bus topics.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Record lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a campaign record.
///
/// ```text
/// Active --delete--> Deleted --purge--> Purged (terminal)
///    ^                  |
///    +-----restore------+
/// ```
///
/// The master collection only ever holds `Active` and `Deleted` records; a
/// purge removes the record, so `Purged` exists only as the result of a
/// transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Visible in the active view.
    #[default]
    Active,
    /// Soft-deleted: hidden from the active view, still restorable.
    Deleted,
    /// Physically removed from the master collection.
    Purged,
}

/// A requested lifecycle move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    /// Soft-delete an active record.
    Delete,
    /// Bring a soft-deleted record back.
    Restore,
    /// Remove a soft-deleted record for good.
    Purge,
}

/// An illegal lifecycle move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action:?} a record that is {from:?}")]
pub struct TransitionError {
    /// The state the record was in.
    pub from: Lifecycle,
    /// The action that was refused.
    pub action: LifecycleAction,
}

impl Lifecycle {
    /// Apply `action` to this state.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] for every move not drawn in the diagram
    /// above, including `Active --purge-->`.
    pub const fn apply(self, action: LifecycleAction) -> Result<Self, TransitionError> {
        match (self, action) {
            (Self::Active, LifecycleAction::Delete) => Ok(Self::Deleted),
            (Self::Deleted, LifecycleAction::Restore) => Ok(Self::Active),
            (Self::Deleted, LifecycleAction::Purge) => Ok(Self::Purged),
            (from, action) => Err(TransitionError { from, action }),
        }
    }

    /// Return whether the record is in the active view.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Return whether the record is soft-deleted.
    pub const fn is_deleted(self) -> bool {
        matches!(self, Self::Deleted)
    }
}

// ---------------------------------------------------------------------------
// Change actions
// ---------------------------------------------------------------------------

/// The kind of mutation recorded in the change log and carried by
/// `DATA_UPDATED` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// A record was appended.
    Add,
    /// Fields were merged into a record.
    Update,
    /// A record was soft-deleted.
    Delete,
    /// A soft-deleted record was restored.
    Restore,
    /// A soft-deleted record was purged.
    PermanentDelete,
    /// A chunked bulk import was appended.
    Import,
}

impl ChangeAction {
    /// Return the wire name of the action (e.g. `"permanent_delete"`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::PermanentDelete => "permanent_delete",
            Self::Import => "import",
        }
    }
}

impl core::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Bus topics
// ---------------------------------------------------------------------------

/// Named channel on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    /// The master collection was replaced wholesale.
    DataLoaded,
    /// A single mutation (or one bulk import) was applied.
    DataUpdated,
    /// The filter UI produced a new filter specification.
    UiFilterChanged,
    /// A filter pass completed.
    FiltersApplied,
    /// Secondary indexes were rebuilt from a fresh snapshot.
    IndexesRebuilt,
    /// A filter pass exceeded its time budget.
    PerformanceWarning,
}

impl Topic {
    /// Every topic, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::DataLoaded,
        Self::DataUpdated,
        Self::UiFilterChanged,
        Self::FiltersApplied,
        Self::IndexesRebuilt,
        Self::PerformanceWarning,
    ];

    /// Return the wire name of the topic (e.g. `"DATA_UPDATED"`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataLoaded => "DATA_LOADED",
            Self::DataUpdated => "DATA_UPDATED",
            Self::UiFilterChanged => "UI_FILTER_CHANGED",
            Self::FiltersApplied => "FILTERS_APPLIED",
            Self::IndexesRebuilt => "INDEXES_REBUILT",
            Self::PerformanceWarning => "PERFORMANCE_WARNING",
        }
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_allows_documented_moves() {
        assert_eq!(Lifecycle::Active.apply(LifecycleAction::Delete), Ok(Lifecycle::Deleted));
        assert_eq!(Lifecycle::Deleted.apply(LifecycleAction::Restore), Ok(Lifecycle::Active));
        assert_eq!(Lifecycle::Deleted.apply(LifecycleAction::Purge), Ok(Lifecycle::Purged));
    }

    #[test]
    fn active_cannot_jump_to_purged() {
        let err = Lifecycle::Active.apply(LifecycleAction::Purge);
        assert_eq!(
            err,
            Err(TransitionError {
                from: Lifecycle::Active,
                action: LifecycleAction::Purge,
            })
        );
    }

    #[test]
    fn purged_is_terminal() {
        for action in [
            LifecycleAction::Delete,
            LifecycleAction::Restore,
            LifecycleAction::Purge,
        ] {
            assert!(Lifecycle::Purged.apply(action).is_err());
        }
    }

    #[test]
    fn restore_of_active_is_refused() {
        assert!(Lifecycle::Active.apply(LifecycleAction::Restore).is_err());
        assert!(Lifecycle::Deleted.apply(LifecycleAction::Delete).is_err());
    }

    #[test]
    fn wire_names_match_serde() {
        let json = serde_json::to_string(&ChangeAction::PermanentDelete).ok();
        assert_eq!(json.as_deref(), Some("\"permanent_delete\""));
        for topic in Topic::ALL {
            let json = serde_json::to_string(&topic).ok();
            assert_eq!(json, Some(format!("\"{}\"", topic.as_str())));
        }
    }
}
