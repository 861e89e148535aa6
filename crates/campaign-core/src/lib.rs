//! Orchestration for the campaign data-management core.
//!
//! This crate wires the store, the filter engine and the views together and
//! hosts the planner configuration.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `campaign-config.yaml` into
//!   strongly-typed structs.
//! - [`controller`] -- The [`Controller`]: campaign operations, filter
//!   application, whole-set pushes to [`RenderTarget`]s.
//! - [`kpi`] -- Funnel forecast arithmetic for `expectedLeads`.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use campaign_core::{Controller, MemoryRenderTarget, RenderTarget};
//! use campaign_events::EventBus;
//! use campaign_store::DataStore;
//! use campaign_types::FieldRegistry;
//! use serde_json::json;
//!
//! let controller = Controller::new(
//!     DataStore::new(EventBus::new()),
//!     FieldRegistry::campaign_defaults(),
//! );
//! let grid = Arc::new(MemoryRenderTarget::new());
//! controller.attach(Arc::clone(&grid) as Arc<dyn RenderTarget>);
//!
//! controller.store().set_data_json(json!([
//!     {"id": "c-1", "region": "EMEA"},
//!     {"id": "c-2", "region": "APAC"},
//! ]));
//! let emea = controller.apply_filters_json(&json!({"region": ["EMEA"]}));
//! assert_eq!(emea.map(|rows| rows.len()).ok(), Some(1));
//! assert_eq!(grid.data().len(), 1);
//! ```

pub mod config;
pub mod controller;
pub mod kpi;

pub use config::{ConfigError, PlannerConfig};
pub use controller::{Controller, ControllerError, MemoryRenderTarget, RenderTarget};
pub use kpi::{KpiError, KpiForecast};
