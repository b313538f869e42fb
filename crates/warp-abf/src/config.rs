use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use warp_grid::GridSpec;

use crate::error::{AbfError, AbfResult};

/// Full ABF method configuration.
///
/// Every CV contributes one histogram axis and, optionally, a harmonic
/// restraint that keeps it inside the histogram domain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AbfConfig {
    pub cvs: Vec<CvAxisSpec>,
    pub timestep: f64,
    #[serde(default = "default_min_count")]
    pub min_count: u64,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub print: PrintDetails,
    /// Steps between histogram backups; -1 disables them.
    #[serde(default = "default_backup_interval")]
    pub backup_interval: i64,
    /// Converts d(momentum)/dt into force units of the histogram.
    #[serde(default = "default_unit_conversion")]
    pub unit_conversion: f64,
    #[serde(default)]
    pub orthogonalize: bool,
    #[serde(default = "default_one")]
    pub frequency: u64,
    #[serde(default = "default_one")]
    pub sync_interval: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CvAxisSpec {
    pub min: f64,
    pub max: f64,
    pub bins: usize,
    #[serde(default)]
    pub periodic: bool,
    #[serde(default)]
    pub restraint: Option<RestraintSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RestraintSpec {
    pub min: f64,
    pub max: f64,
    pub spring_constant: f64,
}

/// Walker trace selection. A frequency of 0 turns the trace off.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintDetails {
    pub frequency: u64,
    pub cvs: bool,
    pub orthogonalization: bool,
    pub normalization: bool,
    pub gradient: bool,
    pub genforce: bool,
    pub coords: bool,
    pub restraint: bool,
    pub biases: bool,
}

fn default_min_count() -> u64 {
    100
}

fn default_backup_interval() -> i64 {
    -1
}

fn default_unit_conversion() -> f64 {
    1.0
}

fn default_one() -> u64 {
    1
}

pub const DEFAULT_FILENAME: &str = "F_out";

impl CvAxisSpec {
    pub fn new(min: f64, max: f64, bins: usize) -> Self {
        Self {
            min,
            max,
            bins,
            periodic: false,
            restraint: None,
        }
    }

    pub fn bin_width(&self) -> f64 {
        (self.max - self.min) / self.bins as f64
    }
}

impl PrintDetails {
    pub fn enabled(&self) -> bool {
        self.frequency > 0
    }
}

impl AbfConfig {
    pub fn new(cvs: Vec<CvAxisSpec>, timestep: f64) -> Self {
        Self {
            cvs,
            timestep,
            min_count: default_min_count(),
            filename: None,
            print: PrintDetails::default(),
            backup_interval: default_backup_interval(),
            unit_conversion: default_unit_conversion(),
            orthogonalize: false,
            frequency: 1,
            sync_interval: 1,
        }
    }

    pub fn from_json_str(content: &str) -> AbfResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| AbfError::Parse(format!("json parse error: {e}")))
    }

    pub fn from_yaml_str(content: &str) -> AbfResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| AbfError::Parse(format!("yaml parse error: {e}")))
    }

    /// Loads a JSON or YAML config, chosen by file extension.
    pub fn from_path(path: &Path) -> AbfResult<Self> {
        let content = fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        if ext == "yaml" || ext == "yml" {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    pub fn dimension(&self) -> usize {
        self.cvs.len()
    }

    pub fn filename(&self) -> &str {
        self.filename.as_deref().unwrap_or(DEFAULT_FILENAME)
    }

    pub fn grid_spec(&self) -> GridSpec {
        GridSpec {
            lower: self.cvs.iter().map(|cv| cv.min).collect(),
            upper: self.cvs.iter().map(|cv| cv.max).collect(),
            number_points: self.cvs.iter().map(|cv| cv.bins).collect(),
            periodic: Some(self.cvs.iter().map(|cv| cv.periodic).collect()),
        }
    }

    pub fn restraints(&self) -> Vec<Option<RestraintSpec>> {
        self.cvs.iter().map(|cv| cv.restraint).collect()
    }

    pub fn backups_enabled(&self) -> bool {
        self.backup_interval > 0
    }

    /// Output files are written only when a filename or backups were asked for.
    pub fn persistence_enabled(&self) -> bool {
        self.filename.is_some() || self.backups_enabled()
    }

    pub fn normalized(&self) -> AbfResult<AbfConfig> {
        let mut cfg = self.clone();
        cfg.validate()?;
        let p = &cfg.print;
        let any_column = p.cvs
            || p.orthogonalization
            || p.normalization
            || p.gradient
            || p.genforce
            || p.coords
            || p.restraint
            || p.biases;
        if p.enabled() && !any_column {
            cfg.print.cvs = true;
            cfg.print.biases = true;
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> AbfResult<()> {
        if self.cvs.is_empty() {
            return Err(AbfError::config("#/cvs", "at least one CV is required"));
        }
        for (i, cv) in self.cvs.iter().enumerate() {
            validate_cv(cv, &format!("#/cvs/{i}"))?;
        }
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(AbfError::config("#/timestep", "timestep must be positive"));
        }
        if !(self.unit_conversion.is_finite() && self.unit_conversion != 0.0) {
            return Err(AbfError::config(
                "#/unit_conversion",
                "unit conversion must be finite and non-zero",
            ));
        }
        if self.backup_interval == 0 || self.backup_interval < -1 {
            return Err(AbfError::config(
                "#/backup_interval",
                "backup interval must be > 0, or -1 to disable",
            ));
        }
        if self.frequency == 0 {
            return Err(AbfError::config("#/frequency", "frequency must be > 0"));
        }
        if self.sync_interval == 0 {
            return Err(AbfError::config("#/sync_interval", "sync interval must be > 0"));
        }
        if let Some(name) = &self.filename {
            if name.trim().is_empty() {
                return Err(AbfError::config("#/filename", "filename cannot be empty"));
            }
        }
        self.grid_spec().validate_at("#/cvs")?;
        Ok(())
    }
}

fn validate_cv(cv: &CvAxisSpec, path: &str) -> AbfResult<()> {
    if cv.bins == 0 {
        return Err(AbfError::config(format!("{path}/bins"), "bins must be >= 1"));
    }
    if !cv.min.is_finite() {
        return Err(AbfError::config(format!("{path}/min"), "min must be finite"));
    }
    if !cv.max.is_finite() || cv.max <= cv.min {
        return Err(AbfError::config(
            format!("{path}/max"),
            format!("max must be finite and greater than min ({})", cv.min),
        ));
    }
    let Some(restraint) = &cv.restraint else {
        return Ok(());
    };
    let path = format!("{path}/restraint");
    if cv.periodic {
        return Err(AbfError::config(
            path,
            "restraints are not supported on periodic CVs",
        ));
    }
    if !(restraint.spring_constant.is_finite() && restraint.spring_constant >= 0.0) {
        return Err(AbfError::config(
            format!("{path}/spring_constant"),
            "spring constant must be finite and >= 0",
        ));
    }
    if !(restraint.min.is_finite() && restraint.max.is_finite()) || restraint.max <= restraint.min
    {
        return Err(AbfError::config(
            format!("{path}/max"),
            "restraint bounds must be finite with max > min",
        ));
    }
    // restraint walls sit at least one bin outside the histogram domain
    let width = cv.bin_width();
    let tol = 1.0e-9 * width;
    if restraint.min > cv.min - width + tol {
        return Err(AbfError::config(
            format!("{path}/min"),
            format!(
                "restraint min {} overlaps histogram; must be <= {}",
                restraint.min,
                cv.min - width
            ),
        ));
    }
    if restraint.max < cv.max + width - tol {
        return Err(AbfError::config(
            format!("{path}/max"),
            format!(
                "restraint max {} overlaps histogram; must be >= {}",
                restraint.max,
                cv.max + width
            ),
        ));
    }
    Ok(())
}
