//! Filter engine for campaign records.
//!
//! Composes a [`FilterSpec`](campaign_types::FilterSpec) into one predicate
//! (AND across fields, OR within a field's membership list, AND across
//! keywords) and runs it over the active records, letting the
//! [`IndexingService`](campaign_index::IndexingService) answer single-value
//! equality tests.
//!
//! # Self-monitoring
//!
//! Every pass is timed and reported on the bus as `FILTERS_APPLIED`. A pass
//! slower than the configured threshold also publishes
//! `PERFORMANCE_WARNING`; this is advisory only.

pub mod engine;

pub use engine::{
    DEFAULT_INDEXED_FIELDS, DEFAULT_SLOW_FILTER_THRESHOLD, FilterEngine, FilterOutcome,
    FilterSettings, unique_values,
};
