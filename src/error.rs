use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced at the crate's few whole-operation boundaries.
///
/// `compute()` itself never returns this — per-cycle degradation (missing
/// inputs, blocked heating, outlier rejection, stale state) is handled
/// locally and reported only through [`crate::debug::DebugPayload`].
#[derive(Debug, Error)]
pub enum ThermalCoreError {
    #[error("invalid controller params: {0}")]
    InvalidParams(String),

    #[error("snapshot I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ThermalCoreError>;
