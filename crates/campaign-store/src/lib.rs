//! Master record store for the campaign core.
//!
//! The store is the single owner of campaign records. Views never mutate
//! records directly; they call the store, which validates the change,
//! applies it atomically, appends to the change log, and publishes a
//! `DATA_UPDATED` event so every subscriber can re-read.
//!
//! # Architecture
//!
//! - [`store`] -- The [`DataStore`]: master collection, active view,
//!   lifecycle moves, chunked import.
//! - [`changelog`] -- The bounded [`ChangeLog`] audit ring.
//!
//! # Lifecycle
//!
//! ```text
//! Active --delete--> Deleted --purge--> (gone)
//!    ^                  |
//!    +-----restore------+
//! ```
//!
//! A purge is only legal from `Deleted`; an active record must be
//! soft-deleted first.
//!
//! # Usage
//!
//! ```
//! use campaign_events::EventBus;
//! use campaign_store::DataStore;
//! use serde_json::json;
//!
//! let store = DataStore::new(EventBus::new());
//! store.set_data_json(json!([{"id": "c-1", "region": "EMEA"}]));
//!
//! assert!(store.delete_row("c-1"));
//! assert!(store.get_data().is_empty());
//! assert!(store.restore_row("c-1"));
//! assert_eq!(store.get_data().len(), 1);
//! ```

pub mod changelog;
pub mod store;

pub use changelog::{ChangeLog, DEFAULT_CHANGE_LOG_CAPACITY};
pub use store::{DEFAULT_IMPORT_CHUNK_SIZE, DataStore, parse_records};

use campaign_types::{RecordId, TransitionError};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors returned by store mutations.
///
/// A failed mutation leaves the store untouched and publishes nothing.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record has this id.
    #[error("record {id} not found")]
    NotFound {
        /// The unknown id.
        id: RecordId,
    },

    /// A record with this id already exists.
    #[error("record {id} already exists")]
    DuplicateId {
        /// The colliding id.
        id: RecordId,
    },

    /// The lifecycle does not allow this move.
    #[error("record {id}: {source}")]
    InvalidTransition {
        /// The record that was asked to move.
        id: RecordId,
        /// The refused move.
        #[source]
        source: TransitionError,
    },

    /// Input could not be turned into records.
    #[error("invalid input: {reason}")]
    Validation {
        /// What was wrong with it.
        reason: String,
    },
}
