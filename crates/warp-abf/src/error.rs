use thiserror::Error;
use warp_grid::GridError;

use crate::comm::SyncError;

#[derive(Debug, Error)]
pub enum AbfError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid config at {path}: {reason}")]
    Config { path: String, reason: String },
    #[error("grid error: {0}")]
    Grid(GridError),
    #[error("engine data mismatch: {0}")]
    Mismatch(String),
    #[error("synchronization failed: {0}")]
    Sync(#[from] SyncError),
    #[error("persistence error at {path}: {reason}")]
    Persistence { path: String, reason: String },
    #[error("lifecycle violation: {0}")]
    Lifecycle(String),
}

pub type AbfResult<T> = Result<T, AbfError>;

impl AbfError {
    pub(crate) fn config(path: impl Into<String>, reason: impl Into<String>) -> Self {
        AbfError::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn persistence(path: impl Into<String>, reason: impl Into<String>) -> Self {
        AbfError::Persistence {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<GridError> for AbfError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::Config { path, reason } => AbfError::Config { path, reason },
            other => AbfError::Grid(other),
        }
    }
}
