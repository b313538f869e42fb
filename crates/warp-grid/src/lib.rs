#![forbid(unsafe_code)]

pub mod error;
pub mod grid;
pub mod spec;

pub use error::{GridError, GridResult};
pub use grid::Grid;
pub use spec::GridSpec;
