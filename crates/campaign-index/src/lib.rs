//! Secondary indexes over campaign records.
//!
//! The [`IndexingService`] turns a point-in-time snapshot of records into
//! per-field lookup maps so equality filters resolve in O(1) average time
//! instead of a linear scan.
//!
//! # Architecture
//!
//! For every indexed field two maps are kept, both keyed by the
//! *normalized* value (see [`campaign_types::FieldKind::normalize`]):
//!
//! - **single**: value → id of the last record seen with that value.
//! - **list**: value → ids of every record with that value, in snapshot
//!   order.
//!
//! Indexes are rebuilt wholesale, never patched. A rebuild happens off to
//! the side and is swapped in under the write lock, so readers see either
//! the old indexes or the new ones.
//!
//! # Usage
//!
//! ```
//! use campaign_index::IndexingService;
//! use campaign_types::{FieldRegistry, Record};
//! use serde_json::json;
//!
//! let rows: Vec<Record> = serde_json::from_value(json!([
//!     {"id": "a", "quarter": "q1-july"},
//!     {"id": "b", "quarter": "Q2 October"},
//! ]))
//! .unwrap_or_default();
//!
//! let index = IndexingService::new();
//! index.create_indexes(&rows, &["quarter"], &FieldRegistry::campaign_defaults(), 1);
//!
//! let hits = index.find_all_by_field("quarter", &json!("Q1 July"));
//! assert_eq!(hits.len(), 1);
//! assert_eq!(index.get_cache_stats().hits, 1);
//! ```

pub mod service;

pub use service::{IndexStats, IndexSummary, IndexingService};
