//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode during startup so `main` can
//! propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: campaign_core::ConfigError,
    },

    /// The snapshot file could not be read.
    #[error("failed to read snapshot {path}: {source}")]
    SnapshotIo {
        /// The snapshot path.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The snapshot file is not valid JSON.
    #[error("failed to parse snapshot {path}: {source}")]
    SnapshotJson {
        /// The snapshot path.
        path: String,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// The snapshot JSON is not an array of records.
    #[error("invalid snapshot: {source}")]
    Snapshot {
        /// The underlying store error.
        #[from]
        source: campaign_store::StoreError,
    },

    /// `CAMPAIGN_FILTER` is not valid JSON.
    #[error("invalid CAMPAIGN_FILTER JSON: {source}")]
    FilterJson {
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// A controller operation failed.
    #[error("controller error: {source}")]
    Controller {
        /// The underlying controller error.
        #[from]
        source: campaign_core::ControllerError,
    },

    /// Logging could not be initialized.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
