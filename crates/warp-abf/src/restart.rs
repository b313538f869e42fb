use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::AbfConfig;
use crate::error::{AbfError, AbfResult};
use crate::histogram::Histogram;

pub const RESTART_KIND: &str = "ABF";
pub const FORMAT_VERSION: u32 = 1;

/// Everything needed to resume a run with an unbroken histogram.
///
/// `F` and `N` hold the merged world statistics, flattened bin-major over
/// the full grid storage (sentinel bins included).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RestartDocument {
    #[serde(rename = "type")]
    pub kind: String,
    pub format_version: u32,
    pub config: AbfConfig,
    pub iteration: u64,
    #[serde(rename = "F")]
    pub forces: Vec<f64>,
    #[serde(rename = "N")]
    pub counts: Vec<u64>,
}

impl RestartDocument {
    pub fn new(config: &AbfConfig, iteration: u64, world: &Histogram) -> Self {
        Self {
            kind: RESTART_KIND.to_string(),
            format_version: FORMAT_VERSION,
            config: config.clone(),
            iteration,
            forces: world.flat_forces(),
            counts: world.flat_counts().to_vec(),
        }
    }

    pub fn validate(&self) -> AbfResult<()> {
        if self.kind != RESTART_KIND {
            return Err(AbfError::persistence(
                "#/type",
                format!("expected \"{RESTART_KIND}\", found \"{}\"", self.kind),
            ));
        }
        if self.format_version != FORMAT_VERSION {
            return Err(AbfError::persistence(
                "#/format_version",
                format!("unsupported version {}", self.format_version),
            ));
        }
        self.config.validate().map_err(|err| match err {
            AbfError::Config { path, reason } => {
                AbfError::persistence(path.replacen('#', "#/config", 1), reason)
            }
            other => other,
        })?;
        let layout = Histogram::new(&self.config.grid_spec())?;
        let n_forces = layout.n_bins() * layout.n_cvs();
        if self.forces.len() != n_forces {
            return Err(AbfError::persistence(
                "#/F",
                format!("expected {n_forces} entries, found {}", self.forces.len()),
            ));
        }
        if let Some(i) = self.forces.iter().position(|f| !f.is_finite()) {
            return Err(AbfError::persistence(
                format!("#/F/{i}"),
                "non-finite force sum",
            ));
        }
        if self.counts.len() != layout.n_bins() {
            return Err(AbfError::persistence(
                "#/N",
                format!(
                    "expected {} entries, found {}",
                    layout.n_bins(),
                    self.counts.len()
                ),
            ));
        }
        Ok(())
    }

    /// Rebuilds the persisted world histogram.
    pub fn histogram(&self) -> AbfResult<Histogram> {
        self.validate()?;
        let mut hist = Histogram::new(&self.config.grid_spec())?;
        hist.load_flat(&self.forces, &self.counts)?;
        Ok(hist)
    }

    pub fn from_json_str(content: &str) -> AbfResult<Self> {
        let doc: RestartDocument = serde_json::from_str(content)
            .map_err(|e| AbfError::persistence("#", format!("malformed restart document: {e}")))?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn to_json_string(&self) -> AbfResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AbfError::persistence("#", format!("failed to encode restart: {e}")))
    }

    pub fn read(path: &Path) -> AbfResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            AbfError::persistence(
                path.display().to_string(),
                format!("failed to read restart file: {err}"),
            )
        })?;
        Self::from_json_str(&content)
    }

    /// Writes through a sibling temporary file so a crash never leaves a
    /// truncated document behind.
    pub fn write(&self, path: &Path) -> AbfResult<()> {
        let content = self.to_json_string()?;
        let tmp = tmp_path(path);
        fs::write(&tmp, content).map_err(|err| {
            AbfError::persistence(
                tmp.display().to_string(),
                format!("failed to write restart file: {err}"),
            )
        })?;
        fs::rename(&tmp, path).map_err(|err| {
            AbfError::persistence(
                path.display().to_string(),
                format!("failed to move restart file into place: {err}"),
            )
        })
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Restart file written next to the world table of `config`.
pub fn restart_path(config: &AbfConfig) -> PathBuf {
    PathBuf::from(format!("{}.restart.json", config.filename()))
}
