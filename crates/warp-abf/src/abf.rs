//! Adaptive biasing force driver.
//!
//! Every processed step the driver estimates the instantaneous generalized
//! force along each CV from the change of the conjugate momentum, adds it
//! to the walker's local histogram, merges all walkers into the world view
//! and applies `-F/max(N, min_count)` (plus any restraint) back onto the
//! atoms through the CV gradients.

use std::io::Write;
use std::path::Path;

use log::{debug, info, warn};

use crate::comm::Communicator;
use crate::config::AbfConfig;
use crate::engine::{CollectiveVariable, Snapshot, Vec3};
use crate::error::{AbfError, AbfResult};
use crate::histogram::Histogram;
use crate::method::{Hook, Method, Phase};
use crate::orthogonalize::Projection;
use crate::report::{walker_trace_path, write_world_table_to, Reporter, StepOutput};
use crate::restart::{restart_path, RestartDocument};
use crate::restraint::RestraintEvaluator;
use crate::sync::GlobalSynchronizer;

pub struct Abf {
    config: AbfConfig,
    restraints: RestraintEvaluator,
    local: Histogram,
    world: Histogram,
    sync: GlobalSynchronizer,
    /// Conjugate momenta of the previous processed step.
    wdotp_old: Option<Vec<f64>>,
    /// Generalized force applied on the previous processed step.
    f_old: Vec<f64>,
    phase: Phase,
    iteration: u64,
    last_step: Option<StepOutput>,
    reporter: Reporter,
}

impl Abf {
    pub fn new(config: AbfConfig, comm: Box<dyn Communicator>) -> AbfResult<Self> {
        let config = config.normalized()?;
        let local = Histogram::new(&config.grid_spec())?;
        let world = local.clone();
        let dim = config.dimension();
        let sync = GlobalSynchronizer::new(comm);
        debug!(
            "ABF rank {}/{}: {} CVs, {} bins (sentinels included)",
            sync.rank(),
            sync.size(),
            dim,
            local.n_bins()
        );
        Ok(Self {
            restraints: RestraintEvaluator::new(config.restraints()),
            reporter: Reporter::new(config.print.clone()),
            config,
            local,
            world,
            sync,
            wdotp_old: None,
            f_old: vec![0.0; dim],
            phase: Phase::Uninitialized,
            iteration: 0,
            last_step: None,
        })
    }

    /// Resumes from a persisted world histogram.
    ///
    /// Rank 0 carries the restored statistics in its local histogram so the
    /// next merge reproduces them exactly once; every rank starts with the
    /// restored world view.
    pub fn from_restart(doc: &RestartDocument, comm: Box<dyn Communicator>) -> AbfResult<Self> {
        let restored = doc.histogram()?;
        let mut abf = Self::new(doc.config.clone(), comm)?;
        if abf.sync.rank() == 0 {
            abf.local = restored.clone();
        }
        abf.world = restored;
        abf.iteration = doc.iteration;
        info!(
            "ABF rank {} resumed at iteration {} with {} world hits",
            abf.sync.rank(),
            doc.iteration,
            abf.world.total_hits()
        );
        Ok(abf)
    }

    pub fn config(&self) -> &AbfConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u64) {
        self.iteration = iteration;
    }

    pub fn local(&self) -> &Histogram {
        &self.local
    }

    pub fn world(&self) -> &Histogram {
        &self.world
    }

    pub fn sync_rounds(&self) -> u64 {
        self.sync.rounds()
    }

    /// Outputs of the most recent processed step.
    pub fn last_step(&self) -> Option<&StepOutput> {
        self.last_step.as_ref()
    }

    /// Adaptive bias (without restraints) at a CV-space point.
    pub fn bias_at(&self, point: &[f64]) -> AbfResult<Vec<f64>> {
        let indices = self.world.counts().indices_of(point)?;
        self.world.mean_force(&indices, self.config.min_count)
    }

    /// Seeds the local histogram, e.g. from an external estimate. Takes
    /// effect in the world view at the next merge.
    pub fn load_histogram(&mut self, forces: &[f64], counts: &[u64]) -> AbfResult<()> {
        if self.phase == Phase::Finished {
            return Err(AbfError::Lifecycle(
                "cannot load a histogram after post-simulation".into(),
            ));
        }
        self.local.load_flat(forces, counts)
    }

    /// Routes the walker trace to `sink` instead of a file.
    pub fn set_trace_sink(&mut self, sink: Box<dyn Write + Send>) {
        self.reporter = Reporter::with_sink(self.config.print.clone(), sink);
    }

    pub fn restart_document(&self) -> RestartDocument {
        RestartDocument::new(&self.config, self.iteration, &self.world)
    }

    fn check_cvs(&self, cvs: &[&dyn CollectiveVariable], n_atoms: usize) -> AbfResult<()> {
        if cvs.len() != self.config.dimension() {
            return Err(AbfError::Mismatch(format!(
                "configured for {} CVs, engine supplied {}",
                self.config.dimension(),
                cvs.len()
            )));
        }
        for (i, cv) in cvs.iter().enumerate() {
            if cv.gradient().len() != n_atoms {
                return Err(AbfError::Mismatch(format!(
                    "gradient of CV {i} has {} atoms, snapshot has {n_atoms}",
                    cv.gradient().len()
                )));
            }
            if !cv.value().is_finite() {
                return Err(AbfError::Mismatch(format!("CV {i} value is not finite")));
            }
        }
        Ok(())
    }

    fn writes_world(&self) -> bool {
        self.sync.rank() == 0 && self.config.persistence_enabled()
    }

    /// Writes the restart document and the world table. Failures are logged
    /// and the run goes on.
    fn backup(&self) {
        if !self.writes_world() {
            return;
        }
        let restart = restart_path(&self.config);
        if let Err(err) = self.restart_document().write(&restart) {
            warn!("ABF backup at iteration {} failed: {err}", self.iteration);
        }
        let table = Path::new(self.config.filename());
        if let Err(err) = write_world_table_to(table, &self.world, self.config.min_count) {
            warn!(
                "ABF world table {} not written: {err}",
                table.display()
            );
        }
        debug!("ABF backup written at iteration {}", self.iteration);
    }

    fn process_step(
        &mut self,
        snapshot: &mut Snapshot,
        cvs: &[&dyn CollectiveVariable],
    ) -> AbfResult<StepOutput> {
        snapshot.check_shape()?;
        self.check_cvs(cvs, snapshot.n_atoms())?;

        let values: Vec<f64> = cvs.iter().map(|cv| cv.value()).collect();
        let gradients: Vec<&[Vec3]> = cvs.iter().map(|cv| cv.gradient()).collect();
        let indices = self.world.counts().indices_of(&values)?;

        let projection = Projection::build(&gradients, self.config.orthogonalize)?;
        let dt = self.config.timestep * self.config.frequency as f64;
        let unitconv = self.config.unit_conversion;
        let mut sample = None;
        let mut corrections = vec![0.0; values.len()];
        let mut normalizations = vec![0.0; values.len()];
        match &projection {
            Some(proj) => {
                let wdotp = proj.project(&snapshot.momenta())?;
                if let Some(old) = &self.wdotp_old {
                    let s: Vec<f64> = wdotp
                        .iter()
                        .zip(old)
                        .zip(&self.f_old)
                        .map(|((w, o), f)| unitconv * (w - o) / dt - f)
                        .collect();
                    if self.sync.is_local_master() {
                        self.local.record(&indices, &s)?;
                    }
                    sample = Some(s);
                }
                self.wdotp_old = Some(wdotp);
                corrections.clone_from(&proj.corrections);
                normalizations.clone_from(&proj.normalizations);
            }
            None => {
                debug!(
                    "ABF iteration {}: degenerate CV directions, sample skipped",
                    self.iteration
                );
                self.wdotp_old = None;
            }
        }

        // keyed on the iteration, which a restart restores
        if (self.iteration / self.config.frequency) % self.config.sync_interval == 0 {
            self.sync.synchronize(&self.local, &mut self.world)?;
        }

        let bias = self.world.mean_force(&indices, self.config.min_count)?;
        let restraint = self.restraints.evaluate(&values);
        let restraint_energy = self.restraints.energy(&values);
        let applied: Vec<f64> = bias.iter().zip(&restraint).map(|(b, r)| r - b).collect();
        for (grad, &f) in gradients.iter().zip(&applied) {
            for (force, g) in snapshot.forces.iter_mut().zip(grad.iter()) {
                *force += g * f;
            }
        }
        self.f_old.clone_from(&applied);

        let gradient_norms = gradients
            .iter()
            .map(|g| g.iter().map(|v| v.norm_squared()).sum::<f64>().sqrt())
            .collect();
        Ok(StepOutput {
            iteration: self.iteration,
            values,
            indices,
            sample,
            bias,
            restraint,
            restraint_energy,
            applied,
            corrections,
            normalizations,
            gradient_norms,
        })
    }
}

impl Method for Abf {
    fn name(&self) -> &'static str {
        "ABF"
    }

    fn frequency(&self) -> u64 {
        self.config.frequency
    }

    fn pre_simulation(
        &mut self,
        snapshot: &mut Snapshot,
        cvs: &[&dyn CollectiveVariable],
    ) -> AbfResult<()> {
        let next = self.phase.advance(Hook::PreSimulation)?;
        snapshot.check_shape()?;
        self.check_cvs(cvs, snapshot.n_atoms())?;
        self.wdotp_old = None;
        self.f_old = vec![0.0; self.config.dimension()];
        if self.config.print.enabled() && !self.reporter.is_open() {
            let path = walker_trace_path(&self.config, self.sync.rank());
            self.reporter.open_file(&path);
        }
        self.sync.synchronize(&self.local, &mut self.world)?;
        self.phase = next;
        info!(
            "ABF ready on rank {}/{}: {} CVs, min_count {}, {} world hits",
            self.sync.rank(),
            self.sync.size(),
            self.config.dimension(),
            self.config.min_count,
            self.world.total_hits()
        );
        Ok(())
    }

    fn post_integration(
        &mut self,
        snapshot: &mut Snapshot,
        cvs: &[&dyn CollectiveVariable],
    ) -> AbfResult<()> {
        self.phase = self.phase.advance(Hook::PostIntegration)?;
        self.iteration += 1;
        if self.iteration % self.config.frequency != 0 {
            return Ok(());
        }
        let step = self.process_step(snapshot, cvs)?;
        self.reporter.record(&step);
        if self.config.backups_enabled()
            && self.iteration % self.config.backup_interval as u64 == 0
        {
            self.backup();
        }
        self.last_step = Some(step);
        Ok(())
    }

    fn post_simulation(
        &mut self,
        _snapshot: &mut Snapshot,
        _cvs: &[&dyn CollectiveVariable],
    ) -> AbfResult<()> {
        let next = self.phase.advance(Hook::PostSimulation)?;
        self.sync.synchronize(&self.local, &mut self.world)?;
        self.backup();
        self.reporter.flush();
        self.phase = next;
        info!(
            "ABF finished on rank {} after {} iterations ({} world hits, {} sync rounds)",
            self.sync.rank(),
            self.iteration,
            self.world.total_hits(),
            self.sync.rounds()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleWalker;
    use crate::config::CvAxisSpec;
    use crate::engine::CvSample;

    fn driver(min_count: u64) -> Abf {
        let mut cfg = AbfConfig::new(vec![CvAxisSpec::new(0.0, 10.0, 10)], 1.0);
        cfg.min_count = min_count;
        Abf::new(cfg, Box::new(SingleWalker)).unwrap()
    }

    fn cv_x(value: f64) -> CvSample {
        CvSample::new(value, vec![Vec3::new(1.0, 0.0, 0.0)])
    }

    #[test]
    fn first_step_records_nothing() {
        let mut abf = driver(1);
        let mut snap = Snapshot::new(1);
        let cv = cv_x(2.5);
        abf.pre_simulation(&mut snap, &[&cv]).unwrap();
        snap.velocities[0] = Vec3::new(3.0, 0.0, 0.0);
        abf.post_integration(&mut snap, &[&cv]).unwrap();
        assert_eq!(abf.world().total_hits(), 0);
        assert!(abf.last_step().unwrap().sample.is_none());
    }

    #[test]
    fn sample_subtracts_previous_bias() {
        let mut abf = driver(1);
        let mut snap = Snapshot::new(1);
        let cv = cv_x(2.5);
        abf.pre_simulation(&mut snap, &[&cv]).unwrap();
        abf.post_integration(&mut snap, &[&cv]).unwrap();

        snap.velocities[0].x = 2.0;
        abf.post_integration(&mut snap, &[&cv]).unwrap();
        let step = abf.last_step().unwrap().clone();
        assert_eq!(step.sample, Some(vec![2.0]));
        assert_eq!(step.bias, vec![2.0]);
        assert_eq!(step.applied, vec![-2.0]);
        assert!((snap.forces[0].x + 2.0).abs() < 1e-12);

        // bias cancels the system force: momentum stays, sample stays 2
        abf.post_integration(&mut snap, &[&cv]).unwrap();
        let step = abf.last_step().unwrap();
        assert_eq!(step.sample, Some(vec![2.0]));
        assert_eq!(abf.world().count(&[2]).unwrap(), 2);
        assert_eq!(abf.world().force_sum(&[2]).unwrap(), &[4.0]);
    }

    #[test]
    fn wrong_cv_count_is_rejected() {
        let mut abf = driver(1);
        let mut snap = Snapshot::new(1);
        let a = cv_x(1.0);
        let b = cv_x(2.0);
        assert!(matches!(
            abf.pre_simulation(&mut snap, &[&a, &b]),
            Err(AbfError::Mismatch(_))
        ));
        assert_eq!(abf.phase(), Phase::Uninitialized);
    }

    #[test]
    fn hooks_out_of_order_fail() {
        let mut abf = driver(1);
        let mut snap = Snapshot::new(1);
        let cv = cv_x(1.0);
        assert!(matches!(
            abf.post_integration(&mut snap, &[&cv]),
            Err(AbfError::Lifecycle(_))
        ));
        abf.pre_simulation(&mut snap, &[&cv]).unwrap();
        abf.post_simulation(&mut snap, &[&cv]).unwrap();
        assert_eq!(abf.phase(), Phase::Finished);
        assert!(abf.post_integration(&mut snap, &[&cv]).is_err());
    }
}
