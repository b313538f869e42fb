#![forbid(unsafe_code)]

pub mod abf;
pub mod comm;
pub mod config;
pub mod engine;
pub mod error;
pub mod histogram;
pub mod method;
pub mod orthogonalize;
pub mod report;
pub mod restart;
pub mod restraint;
pub mod sync;

pub use abf::Abf;
pub use comm::{Communicator, InProcessGroup, SingleWalker, SyncError};
pub use config::{AbfConfig, CvAxisSpec, PrintDetails, RestraintSpec};
pub use engine::{CollectiveVariable, CvSample, Snapshot, Vec3};
pub use error::{AbfError, AbfResult};
pub use histogram::Histogram;
pub use method::{Hook, Method, Phase};
pub use restart::RestartDocument;
