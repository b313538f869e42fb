use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum GridError {
    #[error("invalid grid configuration at {path}: {reason}")]
    Config { path: String, reason: String },
    #[error("dimension {dim} requested from a {dimension}-dimensional grid")]
    DimensionOutOfRange { dim: usize, dimension: usize },
    #[error("indices {indices:?} outside grid with shape {shape:?} (periodic {periodic:?})")]
    IndexOutOfRange {
        indices: Vec<i64>,
        shape: Vec<usize>,
        periodic: Vec<bool>,
    },
    #[error("expected {expected} components, got {found}")]
    Mismatch { expected: usize, found: usize },
    #[error("non-finite coordinate {value} on axis {dim}")]
    NonFinite { dim: usize, value: f64 },
}

pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    pub(crate) fn config(path: impl Into<String>, reason: impl Into<String>) -> Self {
        GridError::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
