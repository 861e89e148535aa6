//! The campaign [`Controller`]: glue between views, the store and the
//! filter engine.
//!
//! # Design
//!
//! Views call the controller; the controller calls the store; the store
//! publishes. The controller never pushes a view update from inside an
//! operation. It reacts to the store's own events instead:
//!
//! ```text
//! update_campaign ──> DataStore ──DATA_UPDATED──> Controller::refresh
//!                                                   │ re-apply last filter
//!                                                   └─> every RenderTarget::replace_data
//! ```
//!
//! That keeps exactly one refresh per mutation no matter who mutated the
//! store. Bus callbacks hold a [`Weak`] reference, so dropping the
//! controller stops the reactions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use campaign_events::{EventBus, SubscriberError, Subscription};
use campaign_filter::{FilterEngine, FilterOutcome, FilterSettings, unique_values};
use campaign_store::{DEFAULT_IMPORT_CHUNK_SIZE, DataStore, StoreError};
use campaign_types::{
    Event, FieldRegistry, FilterSpec, FilterSpecError, Record, RecordId, Topic,
};

use crate::config::PlannerConfig;
use crate::kpi::{self, EXPECTED_LEADS_FIELD, KpiError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by controller operations.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The store refused the mutation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The filter object from the UI was rejected.
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterSpecError),

    /// The KPI forecast could not be computed.
    #[error(transparent)]
    Kpi(#[from] KpiError),
}

// ---------------------------------------------------------------------------
// Render targets
// ---------------------------------------------------------------------------

/// A view fed by the controller (grid, chart, report).
///
/// Each refresh hands the target the complete filtered record set; targets
/// never receive incremental patches.
pub trait RenderTarget: Send + Sync {
    /// Replace everything the target displays with `records`.
    fn replace_data(&self, records: Vec<Record>);

    /// What the target currently displays.
    fn data(&self) -> Vec<Record>;
}

/// In-memory render target that counts replacements.
#[derive(Debug, Default)]
pub struct MemoryRenderTarget {
    records: Mutex<Vec<Record>>,
    replacements: AtomicU64,
}

impl MemoryRenderTarget {
    /// Create an empty target.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times [`RenderTarget::replace_data`] has been called.
    pub fn replacements(&self) -> u64 {
        self.replacements.load(Ordering::Acquire)
    }
}

impl RenderTarget for MemoryRenderTarget {
    fn replace_data(&self, records: Vec<Record>) {
        *self.records.lock().unwrap_or_else(PoisonError::into_inner) = records;
        self.replacements.fetch_add(1, Ordering::AcqRel);
    }

    fn data(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct ControllerInner {
    store: DataStore,
    engine: FilterEngine,
    targets: RwLock<Vec<Arc<dyn RenderTarget>>>,
    current_filter: RwLock<FilterSpec>,
    current_view: RwLock<Vec<Record>>,
}

impl ControllerInner {
    /// Re-apply the current filter to the store and push the result to every
    /// target.
    fn refresh(&self) -> FilterOutcome {
        let (data, version) = self.store.active_snapshot();
        let spec = self
            .current_filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let outcome = self.engine.apply(&data, &spec, version);

        *self
            .current_view
            .write()
            .unwrap_or_else(PoisonError::into_inner) = outcome.records.clone();

        let targets = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for target in &targets {
            target.replace_data(outcome.records.clone());
        }
        debug!(
            matched = outcome.records.len(),
            total = outcome.total,
            targets = targets.len(),
            version,
            "view refreshed"
        );
        outcome
    }

    fn set_filter(&self, spec: FilterSpec) {
        *self
            .current_filter
            .write()
            .unwrap_or_else(PoisonError::into_inner) = spec;
    }
}

/// Orchestrates the store and the filter engine for the views.
pub struct Controller {
    inner: Arc<ControllerInner>,
    subscriptions: Mutex<Vec<Subscription>>,
    import_chunk_size: usize,
}

impl core::fmt::Debug for Controller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("store", &self.inner.store)
            .field("import_chunk_size", &self.import_chunk_size)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Create a controller over `store` with default filter settings.
    pub fn new(store: DataStore, registry: FieldRegistry) -> Self {
        Self::with_settings(store, registry, FilterSettings::default(), DEFAULT_IMPORT_CHUNK_SIZE)
    }

    /// Create a controller over `store` with explicit settings.
    pub fn with_settings(
        store: DataStore,
        registry: FieldRegistry,
        settings: FilterSettings,
        import_chunk_size: usize,
    ) -> Self {
        let engine = FilterEngine::with_settings(store.bus().clone(), registry, settings);
        let inner = Arc::new(ControllerInner {
            store,
            engine,
            targets: RwLock::new(Vec::new()),
            current_filter: RwLock::new(FilterSpec::new()),
            current_view: RwLock::new(Vec::new()),
        });
        let subscriptions = Self::wire(&inner);
        // The store may already hold data loaded before the controller existed.
        inner.refresh();
        Self {
            inner,
            subscriptions: Mutex::new(subscriptions),
            import_chunk_size,
        }
    }

    /// Build the bus, store and controller described by `config`.
    pub fn from_config(config: &PlannerConfig, registry: FieldRegistry) -> Self {
        let bus = EventBus::with_history_capacity(config.events.history_capacity);
        let store = DataStore::with_change_log_capacity(bus, config.store.change_log_capacity);
        Self::with_settings(
            store,
            registry,
            config.filter.settings(),
            config.store.import_chunk_size,
        )
    }

    fn wire(inner: &Arc<ControllerInner>) -> Vec<Subscription> {
        let bus = inner.store.bus().clone();
        let refresh_on = |topic: Topic| {
            let weak: Weak<ControllerInner> = Arc::downgrade(inner);
            bus.subscribe(
                topic,
                move |_event: &Event| {
                    if let Some(inner) = weak.upgrade() {
                        inner.refresh();
                    }
                    Ok(())
                },
                Some("controller"),
            )
        };
        let mut subscriptions = vec![refresh_on(Topic::DataUpdated), refresh_on(Topic::DataLoaded)];

        let weak: Weak<ControllerInner> = Arc::downgrade(inner);
        subscriptions.push(bus.subscribe(
            Topic::UiFilterChanged,
            move |event: &Event| {
                let Event::UiFilterChanged { spec } = event else {
                    return Err(SubscriberError::new("unexpected payload on UI_FILTER_CHANGED"));
                };
                if let Some(inner) = weak.upgrade() {
                    inner.set_filter(spec.clone());
                    inner.refresh();
                }
                Ok(())
            },
            Some("controller"),
        ));
        subscriptions
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The store this controller drives.
    pub fn store(&self) -> &DataStore {
        &self.inner.store
    }

    /// The filter engine.
    pub fn engine(&self) -> &FilterEngine {
        &self.inner.engine
    }

    /// The filter most recently requested.
    pub fn current_filter(&self) -> FilterSpec {
        self.inner
            .current_filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The records produced by the last refresh.
    pub fn current_view(&self) -> Vec<Record> {
        self.inner
            .current_view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attach a render target and push the current view to it.
    pub fn attach(&self, target: Arc<dyn RenderTarget>) {
        target.replace_data(self.current_view());
        self.inner
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target);
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Add a campaign; KPI forecast fields are filled from `expectedLeads`.
    pub fn add_campaign(&self, data: Map<String, Value>) -> Result<RecordId, ControllerError> {
        let data = with_forecast(data)?;
        Ok(self.inner.store.add_row(data)?)
    }

    /// Merge `partial` into campaign `id`.
    ///
    /// When `partial` changes `expectedLeads`, the KPI forecast fields are
    /// recomputed and merged in the same update. Returns `false` (logged) if
    /// `id` is unknown or the forecast overflows.
    pub fn update_campaign(&self, id: &str, partial: Map<String, Value>) -> bool {
        match with_forecast(partial) {
            Ok(partial) => self.inner.store.update_row(id, &partial),
            Err(err) => {
                warn!(id, error = %err, "update rejected");
                false
            }
        }
    }

    /// Soft-delete campaign `id`.
    pub fn delete_campaign(&self, id: &str) -> bool {
        self.inner.store.delete_row(id)
    }

    /// Restore the soft-deleted campaign `id`.
    pub fn restore_campaign(&self, id: &str) -> bool {
        self.inner.store.restore_row(id)
    }

    /// Permanently remove the soft-deleted campaign `id`.
    pub fn purge_campaign(&self, id: &str) -> bool {
        self.inner.store.permanently_delete_row(id)
    }

    /// Bulk-import campaigns in chunks of the configured size.
    pub async fn import_campaigns(&self, records: Vec<Record>) -> usize {
        self.inner
            .store
            .import_chunked(records, self.import_chunk_size)
            .await
    }

    // -----------------------------------------------------------------------
    // Filtering
    // -----------------------------------------------------------------------

    /// Make `spec` the current filter, refresh every target, and return the
    /// filtered records.
    pub fn apply_filters(&self, spec: FilterSpec) -> Vec<Record> {
        self.inner.set_filter(spec);
        self.inner.refresh().records
    }

    /// [`apply_filters`](Self::apply_filters) for the UI's JSON filter
    /// object.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Filter`] if the object does not fit the
    /// field registry; the current filter is left unchanged.
    pub fn apply_filters_json(&self, value: &Value) -> Result<Vec<Record>, ControllerError> {
        let spec = FilterSpec::from_json(value, self.inner.engine.registry())?;
        Ok(self.apply_filters(spec))
    }

    /// Sorted distinct values of `field` across the active campaigns.
    pub fn get_unique_values(&self, field: &str) -> Vec<String> {
        unique_values(&self.inner.store.get_data(), field)
    }

    /// Stop reacting to bus events. Returns how many subscriptions were
    /// still live.
    pub fn shutdown(&self) -> usize {
        let subscriptions: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let live = subscriptions.iter().filter(|s| s.unsubscribe()).count();
        if live > 0 {
            info!(subscriptions = live, "controller detached from bus");
        }
        live
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Merge the KPI forecast into `fields` when they carry `expectedLeads`.
fn with_forecast(mut fields: Map<String, Value>) -> Result<Map<String, Value>, KpiError> {
    let Some(leads) = fields.get(EXPECTED_LEADS_FIELD).and_then(kpi::leads_from_value) else {
        return Ok(fields);
    };
    fields.extend(kpi::forecast(leads)?.to_fields());
    Ok(fields)
}
