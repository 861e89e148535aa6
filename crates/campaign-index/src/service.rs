//! The [`IndexingService`]: snapshot indexes with hit/miss accounting.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use campaign_types::{FieldKind, FieldRegistry, FilterSpec, FilterValue, Record, RecordId};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What a call to [`IndexingService::create_indexes`] built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Indexed field names, in name order.
    pub fields: Vec<String>,
    /// Records in the snapshot.
    pub records: usize,
    /// Store version the snapshot was taken at.
    pub version: u64,
}

/// Lookup counters and index shape, for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Lookups that found at least one record.
    pub hits: u64,
    /// Lookups that found nothing (including unindexed fields).
    pub misses: u64,
    /// `hits / (hits + misses)`, rounded to four places; zero before any
    /// lookup.
    pub hit_rate: Decimal,
    /// Indexed field names, in name order.
    pub fields: Vec<String>,
    /// Records in the snapshot.
    pub records: usize,
    /// Store version of the snapshot, if any indexes are built.
    pub built_version: Option<u64>,
}

// ---------------------------------------------------------------------------
// Per-field maps
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FieldIndex {
    kind: FieldKind,
    /// Last record seen per key.
    single: HashMap<String, RecordId>,
    /// Every record per key, snapshot order.
    list: HashMap<String, Vec<RecordId>>,
}

impl FieldIndex {
    fn build(field: &str, kind: FieldKind, data: &[Record]) -> Self {
        let mut single = HashMap::new();
        let mut list: HashMap<String, Vec<RecordId>> = HashMap::new();
        for record in data {
            let mut seen = HashSet::new();
            for key in keys(&kind, record.get(field)) {
                // An array repeating a value lists the record once.
                if !seen.insert(key.clone()) {
                    continue;
                }
                single.insert(key.clone(), record.id.clone());
                list.entry(key).or_default().push(record.id.clone());
            }
        }
        Self { kind, single, list }
    }

    fn key_for(&self, value: &Value) -> Option<String> {
        self.kind.normalize(value)
    }
}

/// Index keys for one record value; arrays contribute one key per element.
fn keys(kind: &FieldKind, value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| kind.normalize(v)).collect(),
        Some(scalar) => kind.normalize(scalar).into_iter().collect(),
        None => Vec::new(),
    }
}

#[derive(Debug, Default)]
struct IndexState {
    fields: BTreeMap<String, FieldIndex>,
    records: usize,
    built_version: Option<u64>,
}

impl IndexState {
    /// Ids listed under `value` for `field`; `None` when the index cannot
    /// answer (field not indexed, or value has no key).
    fn lookup_all(&self, field: &str, value: &Value) -> Option<&[RecordId]> {
        let index = self.fields.get(field)?;
        let key = index.key_for(value)?;
        Some(index.list.get(&key).map(Vec::as_slice).unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Snapshot secondary indexes over campaign records.
///
/// Holds no records, only ids: results of [`optimized_filter`] always come
/// from the data passed in.
///
/// [`optimized_filter`]: IndexingService::optimized_filter
#[derive(Debug, Default)]
pub struct IndexingService {
    state: RwLock<IndexState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl IndexingService {
    /// Create a service with no indexes.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Build single and list maps for each of `fields` from `data`.
    ///
    /// Replaces every existing index. Values are keyed with the registry's
    /// normalization for the field; `null` and object values are skipped.
    /// `version` is the store version `data` was read at.
    pub fn create_indexes<S: AsRef<str>>(
        &self,
        data: &[Record],
        fields: &[S],
        registry: &FieldRegistry,
        version: u64,
    ) -> IndexSummary {
        let started = Instant::now();
        let built: BTreeMap<String, FieldIndex> = fields
            .iter()
            .map(AsRef::as_ref)
            .map(|field| {
                let kind = registry.kind_or_exact(field).clone();
                (field.to_owned(), FieldIndex::build(field, kind, data))
            })
            .collect();
        let names: Vec<String> = built.keys().cloned().collect();

        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            *state = IndexState {
                fields: built,
                records: data.len(),
                built_version: Some(version),
            };
        }

        info!(
            fields = ?names,
            records = data.len(),
            version,
            elapsed_us = started.elapsed().as_micros(),
            "indexes rebuilt"
        );
        IndexSummary {
            fields: names,
            records: data.len(),
            version,
        }
    }

    /// Id of the last record (in snapshot order) whose `field` equals
    /// `value`.
    pub fn find_by_field(&self, field: &str, value: &Value) -> Option<RecordId> {
        let found = {
            let state = self.read();
            state.fields.get(field).and_then(|index| {
                index
                    .key_for(value)
                    .and_then(|key| index.single.get(&key).cloned())
            })
        };
        self.count(found.is_some());
        found
    }

    /// Ids of every record whose `field` equals `value`, in snapshot order.
    pub fn find_all_by_field(&self, field: &str, value: &Value) -> Vec<RecordId> {
        let found = self
            .read()
            .lookup_all(field, value)
            .map(<[RecordId]>::to_vec)
            .unwrap_or_default();
        self.count(!found.is_empty());
        found
    }

    /// Filter `data` by `spec`, resolving what the indexes can answer.
    ///
    /// Each active predicate with a single operand on an indexed field
    /// narrows the candidate id set through the list index. The remaining
    /// predicates run as a linear pass over the narrowed records. Output
    /// keeps the order of `data`.
    ///
    /// The indexes must have been built from the same version of the data;
    /// records missing from the snapshot are never matched by an indexed
    /// predicate.
    pub fn optimized_filter(
        &self,
        data: &[Record],
        spec: &FilterSpec,
        registry: &FieldRegistry,
    ) -> Vec<Record> {
        let mut candidates: Option<HashSet<RecordId>> = None;
        let mut residual: Vec<(&str, &FilterValue)> = Vec::new();

        {
            let state = self.read();
            for (field, predicate) in spec.active() {
                let ids = predicate
                    .single_value()
                    .and_then(|operand| state.lookup_all(field, operand));
                let Some(ids) = ids else {
                    residual.push((field, predicate));
                    continue;
                };
                self.count(!ids.is_empty());
                let narrowed: HashSet<RecordId> = match candidates.take() {
                    Some(current) => ids.iter().filter(|id| current.contains(*id)).cloned().collect(),
                    None => ids.iter().cloned().collect(),
                };
                candidates = Some(narrowed);
            }
        }

        if candidates.as_ref().is_some_and(HashSet::is_empty) {
            debug!("index narrowed candidates to nothing");
            return Vec::new();
        }

        debug!(
            indexed = candidates.as_ref().map(HashSet::len),
            residual = residual.len(),
            "optimized filter pass"
        );
        data.iter()
            .filter(|record| candidates.as_ref().is_none_or(|c| c.contains(&record.id)))
            .filter(|record| {
                residual
                    .iter()
                    .all(|(field, p)| p.matches(field, registry.kind_or_exact(field), record))
            })
            .cloned()
            .collect()
    }

    /// Return whether the indexes were built from a version other than
    /// `version` (or were never built).
    pub fn is_stale(&self, version: u64) -> bool {
        self.read().built_version != Some(version)
    }

    /// Store version the current indexes were built from.
    pub fn built_version(&self) -> Option<u64> {
        self.read().built_version
    }

    /// Return whether `field` is indexed.
    pub fn is_indexed(&self, field: &str) -> bool {
        self.read().fields.contains_key(field)
    }

    /// Drop every index and reset the counters.
    pub fn clear(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = IndexState::default();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("indexes cleared");
    }

    /// Lookup counters and index shape.
    pub fn get_cache_stats(&self) -> IndexStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits.saturating_add(misses);
        let hit_rate = Decimal::from(hits)
            .checked_div(Decimal::from(total))
            .unwrap_or(Decimal::ZERO)
            .round_dp(4);
        let state = self.read();
        IndexStats {
            hits,
            misses,
            hit_rate,
            fields: state.fields.keys().cloned().collect(),
            records: state.records,
            built_version: state.built_version,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Record> {
        serde_json::from_value(json!([
            {"id": "a", "region": "EMEA", "quarter": "q1-july", "status": "Planning"},
            {"id": "b", "region": "APAC", "quarter": "Q2 October", "status": "Live"},
            {"id": "c", "region": "emea ", "quarter": "Q1 July", "status": "Live",
             "strategicPillars": ["Growth", "Retention", "growth"]},
            {"id": "d", "region": null, "status": "Planning"},
        ]))
        .unwrap()
    }

    fn registry() -> FieldRegistry {
        FieldRegistry::campaign_defaults()
    }

    fn indexed() -> IndexingService {
        let index = IndexingService::new();
        index.create_indexes(
            &rows(),
            &["region", "quarter", "status", "strategicPillars"],
            &registry(),
            7,
        );
        index
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn summary_reports_shape() {
        let index = IndexingService::new();
        let summary = index.create_indexes(&rows(), &["status", "region"], &registry(), 3);
        assert_eq!(summary.fields, vec!["region".to_owned(), "status".to_owned()]);
        assert_eq!(summary.records, 4);
        assert_eq!(summary.version, 3);
    }

    #[test]
    fn list_index_keeps_snapshot_order_and_normalizes() {
        let index = indexed();
        let hits = index.find_all_by_field("region", &json!("EMEA"));
        assert_eq!(hits, vec![RecordId::new("a"), RecordId::new("c")]);
        let hits = index.find_all_by_field("quarter", &json!("q1 JULY"));
        assert_eq!(hits, vec![RecordId::new("a"), RecordId::new("c")]);
    }

    #[test]
    fn single_index_is_last_wins() {
        let index = indexed();
        assert_eq!(
            index.find_by_field("status", &json!("live")),
            Some(RecordId::new("c"))
        );
    }

    #[test]
    fn arrays_index_each_element_once() {
        let index = indexed();
        assert_eq!(
            index.find_all_by_field("strategicPillars", &json!("growth")),
            vec![RecordId::new("c")]
        );
        assert_eq!(
            index.find_all_by_field("strategicPillars", &json!("Retention")),
            vec![RecordId::new("c")]
        );
    }

    #[test]
    fn hit_and_miss_accounting() {
        let index = indexed();
        assert!(index.find_by_field("region", &json!("EMEA")).is_some());
        assert!(index.find_by_field("region", &json!("LATAM")).is_none());
        assert!(index.find_all_by_field("owner", &json!("Ana")).is_empty());
        assert!(!index.find_all_by_field("status", &json!("Planning")).is_empty());

        let stats = index.get_cache_stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hit_rate, Decimal::new(5, 1));
        assert_eq!(stats.records, 4);
        assert_eq!(stats.built_version, Some(7));
    }

    #[test]
    fn hit_rate_is_zero_before_lookups() {
        assert_eq!(IndexingService::new().get_cache_stats().hit_rate, Decimal::ZERO);
    }

    #[test]
    fn optimized_filter_agrees_with_linear_scan() {
        let index = indexed();
        let reg = registry();
        let data = rows();
        let specs = [
            FilterSpec::new().with("region", FilterValue::Membership(vec![json!("EMEA")])),
            FilterSpec::new()
                .with("region", FilterValue::Membership(vec![json!("EMEA")]))
                .with("status", FilterValue::Exact(json!("Live"))),
            FilterSpec::new().with(
                "status",
                FilterValue::Membership(vec![json!("Live"), json!("Planning")]),
            ),
            FilterSpec::new().with("quarter", FilterValue::Membership(vec![json!("Q1 July")])),
            FilterSpec::new().with("owner", FilterValue::Exact(json!("nobody"))),
            FilterSpec::new(),
        ];
        for spec in &specs {
            let linear: Vec<Record> = data.iter().filter(|r| spec.matches(r, &reg)).cloned().collect();
            assert_eq!(index.optimized_filter(&data, spec, &reg), linear, "{spec:?}");
        }
    }

    #[test]
    fn optimized_filter_returns_records_from_data() {
        let index = indexed();
        let mut data = rows();
        data.iter_mut().for_each(|r| r.set("touched", json!(true)));
        let spec = FilterSpec::new().with("region", FilterValue::Exact(json!("APAC")));
        let out = index.optimized_filter(&data, &spec, &registry());
        assert_eq!(ids(&out), vec!["b"]);
        assert_eq!(out.first().and_then(|r| r.get("touched")), Some(&json!(true)));
    }

    #[test]
    fn disjoint_indexed_predicates_short_circuit() {
        let index = indexed();
        let spec = FilterSpec::new()
            .with("region", FilterValue::Exact(json!("APAC")))
            .with("status", FilterValue::Exact(json!("Planning")));
        assert!(index.optimized_filter(&rows(), &spec, &registry()).is_empty());
    }

    #[test]
    fn staleness_and_clear() {
        let index = indexed();
        assert!(!index.is_stale(7));
        assert!(index.is_stale(8));
        assert!(index.is_indexed("region"));

        index.find_by_field("region", &json!("EMEA"));
        index.clear();
        assert!(index.is_stale(7));
        assert!(!index.is_indexed("region"));
        let stats = index.get_cache_stats();
        assert_eq!(stats.hits, 0);
        assert!(stats.fields.is_empty());
        assert_eq!(stats.built_version, None);
    }
}
