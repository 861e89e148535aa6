//! Engine binary for the campaign planner.
//!
//! Wires the bus, store, filter engine and controller together, loads the
//! local JSON snapshot, runs an initial filter pass and logs what it sees.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `campaign-config.yaml` (defaults if missing)
//! 2. Initialize structured logging (tracing)
//! 3. Build the controller from the configuration
//! 4. Load the JSON snapshot into the store
//! 5. Apply the initial filter (`CAMPAIGN_FILTER`, a JSON object, if set)
//! 6. Log store, index and bus statistics

mod error;
mod snapshot;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use campaign_core::config::LoggingConfig;
use campaign_core::{Controller, MemoryRenderTarget, PlannerConfig, RenderTarget};
use campaign_types::FieldRegistry;

use crate::error::EngineError;

/// Environment variable holding the initial filter as a JSON object.
const ENV_FILTER: &str = "CAMPAIGN_FILTER";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, logging or the snapshot fails to
/// load, or the initial filter is invalid.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging)?;
    info!("campaign-engine starting");
    info!(
        snapshot = %config.data.snapshot_path.display(),
        change_log_capacity = config.store.change_log_capacity,
        slow_filter_threshold_ms = config.filter.slow_filter_threshold_ms,
        indexed_fields = config.filter.indexed_fields.len(),
        "Configuration loaded"
    );

    // 3. Build the controller.
    let controller = Controller::from_config(&config, FieldRegistry::campaign_defaults());
    let grid = Arc::new(MemoryRenderTarget::new());
    controller.attach(Arc::clone(&grid) as Arc<dyn RenderTarget>);

    // 4. Load the snapshot.
    match snapshot::load_snapshot(&config.data.snapshot_path)? {
        Some(records) => {
            let count = controller.store().set_data(records);
            info!(records = count, "Snapshot loaded");
        }
        None => warn!("No snapshot loaded, store is empty"),
    }

    // 5. Initial filter pass.
    let filter = std::env::var(ENV_FILTER)
        .ok()
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|source| EngineError::FilterJson { source })?
        .unwrap_or(serde_json::Value::Null);
    let rows = controller
        .apply_filters_json(&filter)
        .map_err(EngineError::from)?;
    info!(
        matched = rows.len(),
        predicates = controller.current_filter().active_count(),
        "Initial filter applied"
    );

    // 6. Report.
    let stats = controller.store().get_stats();
    let index = controller.engine().index_stats();
    let bus = controller.store().bus().stats();
    info!(
        master = stats.master,
        active = stats.active,
        deleted = stats.deleted,
        version = stats.version,
        grid_rows = grid.data().len(),
        "Store statistics"
    );
    info!(
        hits = index.hits,
        misses = index.misses,
        hit_rate = %index.hit_rate,
        indexed_fields = index.fields.len(),
        "Index statistics"
    );
    info!(
        published = bus.published,
        delivered = bus.delivered,
        failed = bus.failed,
        "Bus statistics"
    );

    controller.shutdown();
    info!("campaign-engine finished");
    Ok(())
}

/// Load configuration from `campaign-config.yaml` in the working directory.
///
/// If the file does not exist, defaults (plus environment overrides) are
/// used.
fn load_config() -> Result<PlannerConfig, EngineError> {
    let config_path = Path::new("campaign-config.yaml");
    if config_path.exists() {
        Ok(PlannerConfig::from_file(config_path)?)
    } else {
        let mut config = PlannerConfig::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) -> Result<(), EngineError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| EngineError::Logging {
        message: e.to_string(),
    })
}
