//! The [`FilterEngine`].

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use campaign_events::EventBus;
use campaign_index::{IndexStats, IndexingService};
use campaign_types::fields::scalar_text;
use campaign_types::{Event, FieldRegistry, FilterSpec, Record};

/// Filter passes slower than this publish a performance warning.
pub const DEFAULT_SLOW_FILTER_THRESHOLD: Duration = Duration::from_millis(50);

/// Fields indexed when no list is configured.
pub const DEFAULT_INDEXED_FIELDS: &[&str] = &[
    "region",
    "status",
    "owner",
    "country",
    "quarter",
    "fiscalYear",
    "programType",
    "strategicPillars",
    "revenuePlay",
];

/// Tunables for a [`FilterEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSettings {
    /// Passes slower than this publish `PERFORMANCE_WARNING`.
    pub slow_filter_threshold: Duration,
    /// Fields kept in the secondary indexes.
    pub indexed_fields: Vec<String>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            slow_filter_threshold: DEFAULT_SLOW_FILTER_THRESHOLD,
            indexed_fields: DEFAULT_INDEXED_FIELDS
                .iter()
                .map(|f| (*f).to_owned())
                .collect(),
        }
    }
}

/// Result of one filter pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Matching records, in input order.
    pub records: Vec<Record>,
    /// Records the pass started from.
    pub total: usize,
    /// Wall time spent, including any index rebuild.
    pub elapsed: Duration,
    /// Whether the indexes were rebuilt for this pass.
    pub rebuilt_indexes: bool,
    /// Whether the pass ran over the threshold.
    pub slow: bool,
}

/// Index-assisted filter engine.
///
/// Owns the indexes and keeps them in step with the store version handed to
/// [`apply`](Self::apply). Events are published after the index lock is
/// released.
#[derive(Debug)]
pub struct FilterEngine {
    bus: EventBus,
    registry: FieldRegistry,
    index: IndexingService,
    settings: FilterSettings,
}

impl FilterEngine {
    /// Create an engine with default settings.
    pub fn new(bus: EventBus, registry: FieldRegistry) -> Self {
        Self::with_settings(bus, registry, FilterSettings::default())
    }

    /// Create an engine with explicit settings.
    pub fn with_settings(bus: EventBus, registry: FieldRegistry, settings: FilterSettings) -> Self {
        Self {
            bus,
            registry,
            index: IndexingService::new(),
            settings,
        }
    }

    /// The field registry predicates are evaluated with.
    pub const fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// The engine's tunables.
    pub const fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    /// The engine's indexes.
    pub const fn index(&self) -> &IndexingService {
        &self.index
    }

    /// Index lookup counters.
    pub fn index_stats(&self) -> IndexStats {
        self.index.get_cache_stats()
    }

    /// Filter the active records `data`, read at store `version`.
    ///
    /// An empty specification returns `data` unchanged without evaluating
    /// a single record. Otherwise stale indexes are rebuilt first
    /// (`INDEXES_REBUILT`), then the index-assisted pass runs. Every pass
    /// publishes `FILTERS_APPLIED`; a slow one also publishes
    /// `PERFORMANCE_WARNING`.
    pub fn apply(&self, data: &[Record], spec: &FilterSpec, version: u64) -> FilterOutcome {
        let started = Instant::now();
        let total = data.len();
        let mut rebuilt_indexes = false;

        let records = if spec.is_empty() {
            debug!(total, "no active predicates, returning all records");
            data.to_vec()
        } else {
            if self.index.is_stale(version) {
                let summary = self.index.create_indexes(
                    data,
                    &self.settings.indexed_fields,
                    &self.registry,
                    version,
                );
                rebuilt_indexes = true;
                self.bus.publish(&Event::IndexesRebuilt {
                    fields: summary.fields,
                    records: summary.records,
                    version: summary.version,
                });
            }
            self.index.optimized_filter(data, spec, &self.registry)
        };

        let elapsed = started.elapsed();
        let threshold = self.settings.slow_filter_threshold;
        let slow = elapsed > threshold;
        debug!(
            matched = records.len(),
            total,
            predicates = spec.active_count(),
            elapsed_us = elapsed.as_micros(),
            "filter pass complete"
        );
        self.bus.publish(&Event::FiltersApplied {
            matched: records.len(),
            total,
            elapsed,
        });
        if slow {
            warn!(
                elapsed_ms = elapsed.as_millis(),
                threshold_ms = threshold.as_millis(),
                records = total,
                "slow filter pass"
            );
            self.bus.publish(&Event::PerformanceWarning {
                operation: "filter".to_owned(),
                elapsed,
                threshold,
                record_count: total,
            });
        }

        FilterOutcome {
            records,
            total,
            elapsed,
            rebuilt_indexes,
            slow,
        }
    }

    /// Plain linear pass, bypassing the indexes. Publishes nothing.
    pub fn filter_linear(&self, data: &[Record], spec: &FilterSpec) -> Vec<Record> {
        data.iter()
            .filter(|record| spec.matches(record, &self.registry))
            .cloned()
            .collect()
    }
}

/// Sorted distinct display values of `field` across `data`.
///
/// Array values contribute each element; blank, `null` and object values
/// are skipped. Values are trimmed but otherwise kept as displayed.
pub fn unique_values(data: &[Record], field: &str) -> Vec<String> {
    let mut values = BTreeSet::new();
    for value in data.iter().filter_map(|r| r.get(field)) {
        let items = match value {
            Value::Array(items) => items.as_slice(),
            scalar => std::slice::from_ref(scalar),
        };
        for text in items.iter().filter_map(scalar_text) {
            let text = text.trim();
            if !text.is_empty() {
                values.insert(text.to_owned());
            }
        }
    }
    values.into_iter().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use campaign_types::{FilterValue, Topic};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn rows() -> Vec<Record> {
        serde_json::from_value(json!([
            {"id": "1", "region": "EMEA", "status": "Planning", "quarter": "q1-july",
             "campaignName": "Spring Launch", "digitalMotions": true},
            {"id": "2", "region": "APAC", "status": "Planning", "quarter": "Q2 October",
             "campaignName": "Partner Summit", "digitalMotions": false},
            {"id": "3", "region": "NA", "status": "Live", "quarter": "Q1 July",
             "campaignName": "Launch Webinar", "programType": ["Webinar", "Digital"]},
        ]))
        .unwrap()
    }

    fn engine() -> FilterEngine {
        FilterEngine::new(EventBus::new(), FieldRegistry::campaign_defaults())
    }

    fn spec(value: Value) -> FilterSpec {
        FilterSpec::from_json(&value, &FieldRegistry::campaign_defaults()).unwrap()
    }

    fn ids(outcome: &FilterOutcome) -> Vec<&str> {
        outcome.records.iter().map(|r| r.id.as_str()).collect()
    }

    fn topics(bus: &EventBus) -> Arc<Mutex<Vec<Topic>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for topic in [
            Topic::FiltersApplied,
            Topic::IndexesRebuilt,
            Topic::PerformanceWarning,
        ] {
            let sink = Arc::clone(&seen);
            bus.subscribe(
                topic,
                move |event| {
                    sink.lock().unwrap().push(event.topic());
                    Ok(())
                },
                None,
            );
        }
        seen
    }

    #[test]
    fn exact_region_match() {
        let out = engine().apply(&rows(), &spec(json!({"region": ["EMEA"]})), 1);
        assert_eq!(ids(&out), vec!["1"]);
        assert_eq!(out.total, 3);
    }

    #[test]
    fn fields_combine_with_and() {
        let out = engine().apply(
            &rows(),
            &spec(json!({"region": ["EMEA", "NA"], "status": ["Planning"]})),
            1,
        );
        assert_eq!(ids(&out), vec!["1"]);
    }

    #[test]
    fn quarter_is_normalized() {
        let out = engine().apply(&rows(), &spec(json!({"quarter": ["Q1 July"]})), 1);
        assert_eq!(ids(&out), vec!["1", "3"]);
    }

    #[test]
    fn keywords_and_flags() {
        let engine = engine();
        let out = engine.apply(&rows(), &spec(json!({"search": "launch"})), 1);
        assert_eq!(ids(&out), vec!["1", "3"]);
        let out = engine.apply(&rows(), &spec(json!({"search": "launch", "digitalMotions": true})), 1);
        assert_eq!(ids(&out), vec!["1"]);
    }

    #[test]
    fn array_field_matches_any_element() {
        let out = engine().apply(&rows(), &spec(json!({"programType": ["digital"]})), 1);
        assert_eq!(ids(&out), vec!["3"]);
    }

    #[test]
    fn empty_spec_short_circuits() {
        let engine = engine();
        let seen = topics(&engine.bus);
        let data = rows();
        let out = engine.apply(&data, &spec(json!({"region": [], "search": ""})), 1);
        assert_eq!(out.records, data);
        assert!(!out.rebuilt_indexes);
        assert_eq!(engine.index().built_version(), None);
        assert_eq!(*seen.lock().unwrap(), vec![Topic::FiltersApplied]);
    }

    #[test]
    fn indexes_rebuild_only_when_version_moves() {
        let engine = engine();
        let seen = topics(&engine.bus);
        let filter = spec(json!({"region": "EMEA"}));
        assert!(engine.apply(&rows(), &filter, 1).rebuilt_indexes);
        assert!(!engine.apply(&rows(), &filter, 1).rebuilt_indexes);

        let mut changed = rows();
        changed.truncate(2);
        let out = engine.apply(&changed, &filter, 2);
        assert!(out.rebuilt_indexes);
        assert_eq!(ids(&out), vec!["1"]);

        let rebuilds = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|t| **t == Topic::IndexesRebuilt)
            .count();
        assert_eq!(rebuilds, 2);
    }

    #[test]
    fn index_pass_agrees_with_linear_pass() {
        let engine = engine();
        let data = rows();
        for value in [
            json!({"region": "APAC"}),
            json!({"status": ["Planning", "Live"], "quarter": "q2-october"}),
            json!({"region": ["emea"], "search": "spring"}),
            json!({"owner": "nobody"}),
        ] {
            let filter = spec(value);
            assert_eq!(
                engine.apply(&data, &filter, 5).records,
                engine.filter_linear(&data, &filter)
            );
        }
    }

    #[test]
    fn slow_pass_publishes_warning() {
        let bus = EventBus::new();
        let settings = FilterSettings {
            slow_filter_threshold: Duration::ZERO,
            ..FilterSettings::default()
        };
        let engine = FilterEngine::with_settings(bus.clone(), FieldRegistry::campaign_defaults(), settings);
        let seen = topics(&bus);
        let data: Vec<Record> = (0..2000)
            .map(|n| {
                serde_json::from_value(json!({"id": n.to_string(), "region": "EMEA", "status": "Live"}))
                    .unwrap()
            })
            .collect();
        let out = engine.apply(&data, &spec(json!({"status": ["Live", "Planning"]})), 1);
        assert!(out.slow);
        assert!(seen.lock().unwrap().contains(&Topic::PerformanceWarning));
    }

    #[test]
    fn unique_values_are_sorted_and_distinct() {
        let mut data = rows();
        data.push(
            serde_json::from_value(json!({"id": "4", "region": " EMEA ", "programType": "Webinar"}))
                .unwrap(),
        );
        assert_eq!(unique_values(&data, "region"), vec!["APAC", "EMEA", "NA"]);
        assert_eq!(unique_values(&data, "programType"), vec!["Digital", "Webinar"]);
        assert!(unique_values(&data, "missing").is_empty());
    }

    #[test]
    fn inactive_flag_does_not_filter() {
        let filter = FilterSpec::new().with("digitalMotions", FilterValue::Flag(false));
        assert_eq!(engine().apply(&rows(), &filter, 1).records.len(), 3);
    }
}
