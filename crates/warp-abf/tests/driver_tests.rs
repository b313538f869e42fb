use std::io::{self, Write};
use std::sync::{Arc, Mutex};

mod common;
use common::{base_config, cleanup, one_atom, restrained_config, temp_path, x_cv};
use warp_abf::comm::{Communicator, SingleWalker, SyncResult};
use warp_abf::config::{AbfConfig, CvAxisSpec, PrintDetails};
use warp_abf::engine::{CvSample, Snapshot, Vec3};
use warp_abf::error::AbfError;
use warp_abf::method::{Method, Phase};
use warp_abf::restart::{restart_path, RestartDocument};
use warp_abf::Abf;

fn start(cfg: AbfConfig) -> (Abf, Snapshot) {
    let mut abf = Abf::new(cfg, Box::new(SingleWalker)).expect("valid config");
    let mut snap = one_atom();
    abf.pre_simulation(&mut snap, &[&x_cv(2.5)])
        .expect("pre-simulation");
    (abf, snap)
}

/// Processes one step at CV value `x` with the atom moving at `vx`.
fn step(abf: &mut Abf, snap: &mut Snapshot, x: f64, vx: f64) {
    snap.velocities[0].x = vx;
    abf.post_integration(snap, &[&x_cv(x)]).expect("post-integration");
}

#[test]
fn bias_respects_min_count() {
    let (mut abf, mut snap) = start(base_config(10));
    step(&mut abf, &mut snap, 2.5, 0.0);
    step(&mut abf, &mut snap, 2.5, 2.0);
    let first = abf.last_step().unwrap().clone();
    assert!((first.bias[0] - 0.2).abs() < 1e-12);
    // previous bias of -0.2 is removed from the next sample
    step(&mut abf, &mut snap, 2.5, 3.8);
    let second = abf.last_step().unwrap();
    assert!((second.sample.as_ref().unwrap()[0] - 2.0).abs() < 1e-12);
    assert_eq!(abf.world().count(&[2]).unwrap(), 2);
    assert!((abf.world().force_sum(&[2]).unwrap()[0] - 4.0).abs() < 1e-12);
    assert!((abf.bias_at(&[2.5]).unwrap()[0] - 0.4).abs() < 1e-12);
    assert_eq!(abf.bias_at(&[7.5]).unwrap(), vec![0.0]);
}

#[test]
fn restraint_pushes_back_into_domain() {
    let (mut abf, mut snap) = start(restrained_config(1, 4.0));
    step(&mut abf, &mut snap, 12.0, 0.0);
    let out = abf.last_step().unwrap();
    assert_eq!(out.indices, vec![10]);
    assert_eq!(out.restraint, vec![-4.0]);
    assert_eq!(out.applied, vec![-4.0]);
    assert!((out.restraint_energy - 2.0).abs() < 1e-12);
    assert!((snap.forces[0].x + 4.0).abs() < 1e-12);
    assert_eq!(snap.forces[0].y, 0.0);
}

#[test]
fn frequency_skips_steps_and_scales_timestep() {
    let mut cfg = base_config(1);
    cfg.timestep = 0.5;
    cfg.frequency = 2;
    let (mut abf, mut snap) = start(cfg);
    step(&mut abf, &mut snap, 2.5, 0.0);
    assert!(abf.last_step().is_none());
    step(&mut abf, &mut snap, 2.5, 0.0);
    step(&mut abf, &mut snap, 2.5, 2.0);
    assert_eq!(abf.last_step().unwrap().iteration, 2);
    step(&mut abf, &mut snap, 2.5, 2.0);
    let out = abf.last_step().unwrap();
    assert_eq!(out.iteration, 4);
    assert!((out.sample.as_ref().unwrap()[0] - 2.0).abs() < 1e-12);
    assert_eq!(abf.world().total_hits(), 1);
}

#[test]
fn unit_conversion_scales_samples() {
    let mut cfg = base_config(1);
    cfg.unit_conversion = 2.0;
    let (mut abf, mut snap) = start(cfg);
    step(&mut abf, &mut snap, 2.5, 0.0);
    step(&mut abf, &mut snap, 2.5, 1.5);
    assert_eq!(abf.last_step().unwrap().sample, Some(vec![3.0]));
}

fn two_cv_run(orthogonalize: bool) -> Vec<f64> {
    let mut cfg = AbfConfig::new(
        vec![CvAxisSpec::new(0.0, 10.0, 10), CvAxisSpec::new(0.0, 10.0, 10)],
        1.0,
    );
    cfg.min_count = 1;
    cfg.orthogonalize = orthogonalize;
    let mut abf = Abf::new(cfg, Box::new(SingleWalker)).unwrap();
    let mut snap = one_atom();
    let x = CvSample::new(1.0, vec![Vec3::new(1.0, 0.0, 0.0)]);
    let xy = CvSample::new(1.0, vec![Vec3::new(1.0, 1.0, 0.0)]);
    abf.pre_simulation(&mut snap, &[&x, &xy]).unwrap();
    abf.post_integration(&mut snap, &[&x, &xy]).unwrap();
    snap.velocities[0] = Vec3::new(2.0, 0.0, 0.0);
    abf.post_integration(&mut snap, &[&x, &xy]).unwrap();
    abf.last_step().unwrap().sample.clone().unwrap()
}

#[test]
fn orthogonalization_removes_shared_direction() {
    let plain = two_cv_run(false);
    assert!((plain[0] - 2.0).abs() < 1e-12);
    assert!((plain[1] - 1.0).abs() < 1e-12);
    let ortho = two_cv_run(true);
    assert!((ortho[0] - 2.0).abs() < 1e-12);
    assert!(ortho[1].abs() < 1e-12);
}

#[test]
fn degenerate_gradient_skips_sample() {
    let (mut abf, mut snap) = start(base_config(1));
    let flat = CvSample::new(2.5, vec![Vec3::zeros()]);
    abf.post_integration(&mut snap, &[&flat]).unwrap();
    snap.velocities[0].x = 1.0;
    abf.post_integration(&mut snap, &[&flat]).unwrap();
    assert!(abf.last_step().unwrap().sample.is_none());
    assert_eq!(abf.world().total_hits(), 0);
}

#[test]
fn shape_mismatch_is_reported() {
    let (mut abf, mut snap) = start(base_config(1));
    let two_atoms = CvSample::new(2.5, vec![Vec3::zeros(); 2]);
    assert!(matches!(
        abf.post_integration(&mut snap, &[&two_atoms]),
        Err(AbfError::Mismatch(_))
    ));
    snap.masses.push(1.0);
    assert!(matches!(
        abf.post_integration(&mut snap, &[&x_cv(2.5)]),
        Err(AbfError::Mismatch(_))
    ));
}

/// Communicator of a walker rank that is not its group's master.
struct Follower;

impl Communicator for Follower {
    fn rank(&self) -> usize {
        1
    }

    fn size(&self) -> usize {
        1
    }

    fn is_local_master(&self) -> bool {
        false
    }

    fn all_reduce_sum_f64(&mut self, local: &[f64], global: &mut [f64]) -> SyncResult<()> {
        global.copy_from_slice(local);
        Ok(())
    }

    fn all_reduce_sum_u64(&mut self, local: &[u64], global: &mut [u64]) -> SyncResult<()> {
        global.copy_from_slice(local);
        Ok(())
    }
}

#[test]
fn only_local_masters_record() {
    let mut abf = Abf::new(base_config(1), Box::new(Follower)).unwrap();
    let mut snap = one_atom();
    abf.pre_simulation(&mut snap, &[&x_cv(2.5)]).unwrap();
    step(&mut abf, &mut snap, 2.5, 0.0);
    step(&mut abf, &mut snap, 2.5, 2.0);
    assert_eq!(abf.last_step().unwrap().sample, Some(vec![2.0]));
    assert_eq!(abf.local().total_hits(), 0);
    assert_eq!(abf.world().total_hits(), 0);
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn walker_trace_lists_selected_columns() {
    let mut cfg = base_config(1);
    cfg.print = PrintDetails {
        frequency: 1,
        genforce: true,
        ..PrintDetails::default()
    };
    let mut abf = Abf::new(cfg, Box::new(SingleWalker)).unwrap();
    let buf = SharedBuf::default();
    abf.set_trace_sink(Box::new(buf.clone()));
    let mut snap = one_atom();
    abf.pre_simulation(&mut snap, &[&x_cv(2.5)]).unwrap();
    step(&mut abf, &mut snap, 2.5, 0.0);
    step(&mut abf, &mut snap, 2.5, 2.0);
    abf.post_simulation(&mut snap, &[&x_cv(2.5)]).unwrap();
    let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    let rows: Vec<Vec<f64>> = text
        .lines()
        .map(|l| l.split_whitespace().map(|c| c.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], vec![1.0, 0.0]);
    assert_eq!(rows[1][0], 2.0);
    assert!((rows[1][1] - 2.0).abs() < 1e-9);
}

#[test]
fn backups_and_final_table_are_written() {
    let base = temp_path("backup");
    let mut cfg = base_config(1);
    cfg.filename = Some(base.to_string_lossy().to_string());
    cfg.backup_interval = 2;
    let (mut abf, mut snap) = start(cfg.clone());
    step(&mut abf, &mut snap, 2.5, 0.0);
    step(&mut abf, &mut snap, 2.5, 2.0);

    let restart = restart_path(&cfg);
    let doc = RestartDocument::read(&restart).expect("backup written");
    assert_eq!(doc.iteration, 2);
    assert_eq!(doc.histogram().unwrap().count(&[2]).unwrap(), 1);

    step(&mut abf, &mut snap, 2.5, 2.0);
    abf.post_simulation(&mut snap, &[&x_cv(2.5)]).unwrap();
    assert_eq!(abf.phase(), Phase::Finished);
    let doc = RestartDocument::read(&restart).expect("final restart");
    assert_eq!(doc.iteration, 3);
    let table = std::fs::read_to_string(&base).expect("world table");
    let rows: Vec<&str> = table.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(rows.len(), 10);
    let bin2: Vec<f64> = rows[2]
        .split_whitespace()
        .map(|c| c.parse().unwrap())
        .collect();
    assert_eq!(bin2[1], 2.0);
    assert!((bin2[2] - 2.0).abs() < 1e-9);
    cleanup(&[&base, &restart]);
}

#[test]
fn loaded_histogram_reaches_world_at_start() {
    let mut abf = Abf::new(base_config(1), Box::new(SingleWalker)).unwrap();
    let n_bins = abf.local().n_bins();
    let mut forces = vec![0.0; n_bins];
    let mut counts = vec![0u64; n_bins];
    // storage index 3 is interior bin 2 behind the low sentinel
    forces[3] = 6.0;
    counts[3] = 3;
    abf.load_histogram(&forces, &counts).unwrap();
    let mut snap = one_atom();
    abf.pre_simulation(&mut snap, &[&x_cv(2.5)]).unwrap();
    assert_eq!(abf.bias_at(&[2.5]).unwrap(), vec![2.0]);
    assert!(abf.load_histogram(&forces[1..], &counts).is_err());
}
