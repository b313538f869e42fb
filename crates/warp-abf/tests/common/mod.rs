#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use warp_abf::config::{AbfConfig, CvAxisSpec, RestraintSpec};
use warp_abf::engine::{CvSample, Snapshot, Vec3};

pub fn temp_path(label: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let label_path = Path::new(label);
    let stem = label_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(label);
    let ext = label_path.extension().and_then(|s| s.to_str());
    let filename = if let Some(ext) = ext {
        format!(
            "warp_abf_test_{stem}_{}_{}.{}",
            std::process::id(),
            nanos,
            ext
        )
    } else {
        format!("warp_abf_test_{label}_{}_{}", std::process::id(), nanos)
    };
    path.push(filename);
    path
}

pub fn write_text(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write temp file");
}

/// One CV on `[0, 10)` with 10 bins and unit timestep.
pub fn base_config(min_count: u64) -> AbfConfig {
    let mut cfg = AbfConfig::new(vec![CvAxisSpec::new(0.0, 10.0, 10)], 1.0);
    cfg.min_count = min_count;
    cfg
}

pub fn restrained_config(min_count: u64, spring_constant: f64) -> AbfConfig {
    let mut cfg = base_config(min_count);
    cfg.cvs[0].restraint = Some(RestraintSpec {
        min: -1.0,
        max: 11.0,
        spring_constant,
    });
    cfg
}

/// Single unit-mass atom.
pub fn one_atom() -> Snapshot {
    Snapshot::new(1)
}

/// CV equal to the x coordinate of the single atom.
pub fn x_cv(value: f64) -> CvSample {
    CvSample::new(value, vec![Vec3::new(1.0, 0.0, 0.0)])
}

pub fn cleanup(paths: &[&Path]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}
