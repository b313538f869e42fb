//! Host-engine side of the per-step contract.

use nalgebra::Vector3;

use crate::error::{AbfError, AbfResult};

pub type Vec3 = Vector3<f64>;

/// A collective variable as seen by a biasing method: its current value and
/// its gradient with respect to every atom of the snapshot.
pub trait CollectiveVariable {
    fn value(&self) -> f64;
    fn gradient(&self) -> &[Vec3];
}

/// Precomputed CV value and gradient.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CvSample {
    pub value: f64,
    pub gradient: Vec<Vec3>,
}

impl CvSample {
    pub fn new(value: f64, gradient: Vec<Vec3>) -> Self {
        Self { value, gradient }
    }
}

impl CollectiveVariable for CvSample {
    fn value(&self) -> f64 {
        self.value
    }

    fn gradient(&self) -> &[Vec3] {
        &self.gradient
    }
}

/// Per-walker view of the simulation state handed over by the engine.
///
/// Methods add their bias into `forces`; everything else is read-only.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub masses: Vec<f64>,
    pub forces: Vec<Vec3>,
    pub iteration: u64,
    pub walker_id: usize,
}

impl Snapshot {
    pub fn new(n_atoms: usize) -> Self {
        Self {
            positions: vec![Vec3::zeros(); n_atoms],
            velocities: vec![Vec3::zeros(); n_atoms],
            masses: vec![1.0; n_atoms],
            forces: vec![Vec3::zeros(); n_atoms],
            iteration: 0,
            walker_id: 0,
        }
    }

    pub fn n_atoms(&self) -> usize {
        self.masses.len()
    }

    pub fn check_shape(&self) -> AbfResult<()> {
        let n = self.n_atoms();
        if self.positions.len() != n || self.velocities.len() != n || self.forces.len() != n {
            return Err(AbfError::Mismatch(format!(
                "snapshot arrays disagree: {} masses, {} positions, {} velocities, {} forces",
                n,
                self.positions.len(),
                self.velocities.len(),
                self.forces.len()
            )));
        }
        Ok(())
    }

    /// Mass-weighted velocities.
    pub fn momenta(&self) -> Vec<Vec3> {
        self.velocities
            .iter()
            .zip(&self.masses)
            .map(|(v, &m)| v * m)
            .collect()
    }
}
