use std::path::PathBuf;

use thiserror::Error;

/// Result type for insight store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations. A missing insight is not an error; lookups
/// report it through `Option`/`bool` results instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("importance {0} is outside [0, 1]")]
    InvalidImportance(f64),
    #[error("reinforcement multiplier {0} must be finite and non-negative")]
    InvalidMultiplier(f64),
    #[error("i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read legacy store {path}: {source}")]
    LegacySource {
        path: PathBuf,
        #[source]
        source: Box<StoreError>,
    },
    #[error(transparent)]
    Watcher(#[from] notify::Error),
    #[error(transparent)]
    Atomic(#[from] anyhow::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
