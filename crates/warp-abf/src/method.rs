use std::fmt;

use crate::engine::{CollectiveVariable, Snapshot};
use crate::error::{AbfError, AbfResult};

/// Hooks a biasing method exposes to the host engine.
///
/// The host calls `pre_simulation` once, `post_integration` after every
/// integration step, and `post_simulation` once at the end.
pub trait Method {
    fn name(&self) -> &'static str;

    /// Steps between two processed `post_integration` calls.
    fn frequency(&self) -> u64 {
        1
    }

    fn pre_simulation(
        &mut self,
        snapshot: &mut Snapshot,
        cvs: &[&dyn CollectiveVariable],
    ) -> AbfResult<()>;

    fn post_integration(
        &mut self,
        snapshot: &mut Snapshot,
        cvs: &[&dyn CollectiveVariable],
    ) -> AbfResult<()>;

    fn post_simulation(
        &mut self,
        snapshot: &mut Snapshot,
        cvs: &[&dyn CollectiveVariable],
    ) -> AbfResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Ready,
    Running,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hook {
    PreSimulation,
    PostIntegration,
    PostSimulation,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::PreSimulation => write!(f, "pre-simulation"),
            Hook::PostIntegration => write!(f, "post-integration"),
            Hook::PostSimulation => write!(f, "post-simulation"),
        }
    }
}

impl Phase {
    /// Phase after `hook` fires in `self`, or a lifecycle error.
    pub fn advance(self, hook: Hook) -> AbfResult<Phase> {
        match (self, hook) {
            (Phase::Uninitialized, Hook::PreSimulation) => Ok(Phase::Ready),
            (Phase::Ready | Phase::Running, Hook::PostIntegration) => Ok(Phase::Running),
            (Phase::Ready | Phase::Running, Hook::PostSimulation) => Ok(Phase::Finished),
            (phase, hook) => Err(AbfError::Lifecycle(format!(
                "{hook} hook is not allowed in phase {phase:?}"
            ))),
        }
    }
}
