//! Shared type definitions for the campaign data-management core.
//!
//! This crate is the single source of truth for the types that cross crate
//! boundaries: the record itself, its lifecycle, bus events, and filter
//! specifications. Types the filter UI consumes flow downstream to
//! `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- The [`RecordId`] string identifier
//! - [`enums`] -- Lifecycle state machine, change actions, bus topics
//! - [`structs`] -- [`Record`], change-log entries, store counters
//! - [`fields`] -- Field-kind registry and value normalization
//! - [`filter`] -- Filter specification parsed from the UI
//! - [`event`] -- Typed bus payloads

pub mod enums;
pub mod event;
pub mod fields;
pub mod filter;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{ChangeAction, Lifecycle, LifecycleAction, Topic, TransitionError};
pub use event::Event;
pub use fields::{FieldKind, FieldRegistry};
pub use filter::{FilterSpec, FilterSpecError, FilterValue};
pub use ids::RecordId;
pub use structs::{ChangeLogEntry, Record, StoreStats};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for the filter UI.

    #[test]
    fn export_bindings() {
        // ts-rs writes the bindings to the `bindings/` directory relative to
        // the crate root when `export_all` runs.
        use ts_rs::TS;

        let _ = crate::ids::RecordId::export_all();
        let _ = crate::enums::Lifecycle::export_all();
        let _ = crate::enums::LifecycleAction::export_all();
        let _ = crate::enums::ChangeAction::export_all();
        let _ = crate::enums::Topic::export_all();
        let _ = crate::fields::FieldKind::export_all();
        let _ = crate::filter::FilterValue::export_all();
    }
}
