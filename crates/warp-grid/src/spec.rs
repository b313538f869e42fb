use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};

/// Per-axis description of a grid as it appears in configuration files.
///
/// `periodic` may be omitted, in which case every axis is non-periodic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub number_points: Vec<usize>,
    #[serde(default)]
    pub periodic: Option<Vec<bool>>,
}

impl GridSpec {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>, number_points: Vec<usize>) -> Self {
        Self {
            lower,
            upper,
            number_points,
            periodic: None,
        }
    }

    pub fn with_periodic(mut self, periodic: Vec<bool>) -> Self {
        self.periodic = Some(periodic);
        self
    }

    pub fn dimension(&self) -> usize {
        self.number_points.len()
    }

    /// Periodicity flags, one per axis.
    pub fn periodicity(&self) -> Vec<bool> {
        match &self.periodic {
            Some(flags) => flags.clone(),
            None => vec![false; self.dimension()],
        }
    }

    /// Checks the layout and reports the first offending field relative to `path`.
    pub fn validate_at(&self, path: &str) -> GridResult<()> {
        let dim = self.number_points.len();
        if dim == 0 {
            return Err(GridError::config(
                format!("{path}/number_points"),
                "grid needs at least one axis",
            ));
        }
        if self.lower.len() != dim {
            return Err(GridError::config(
                format!("{path}/lower"),
                format!("expected {dim} entries, got {}", self.lower.len()),
            ));
        }
        if self.upper.len() != dim {
            return Err(GridError::config(
                format!("{path}/upper"),
                format!("expected {dim} entries, got {}", self.upper.len()),
            ));
        }
        if let Some(periodic) = &self.periodic {
            if periodic.len() != dim {
                return Err(GridError::config(
                    format!("{path}/periodic"),
                    format!("expected {dim} entries, got {}", periodic.len()),
                ));
            }
        }
        for d in 0..dim {
            if self.number_points[d] == 0 {
                return Err(GridError::config(
                    format!("{path}/number_points/{d}"),
                    "number of points must be >= 1",
                ));
            }
            let (lo, hi) = (self.lower[d], self.upper[d]);
            if !lo.is_finite() {
                return Err(GridError::config(
                    format!("{path}/lower/{d}"),
                    "lower edge must be finite",
                ));
            }
            if !hi.is_finite() {
                return Err(GridError::config(
                    format!("{path}/upper/{d}"),
                    "upper edge must be finite",
                ));
            }
            if hi <= lo {
                return Err(GridError::config(
                    format!("{path}/upper/{d}"),
                    format!("upper edge {hi} must be greater than lower edge {lo}"),
                ));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> GridResult<()> {
        self.validate_at("#/grid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_reports_offending_axis() {
        let spec = GridSpec::new(vec![0.0, 1.0], vec![1.0, 1.0], vec![4, 4]);
        match spec.validate() {
            Err(GridError::Config { path, .. }) => assert_eq!(path, "#/grid/upper/1"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_mismatched_vectors() {
        let spec = GridSpec::new(vec![0.0], vec![1.0, 2.0], vec![4, 4]);
        let err = spec.validate_at("#/cvs").unwrap_err();
        assert!(matches!(err, GridError::Config { ref path, .. } if path == "#/cvs/lower"));

        let spec = GridSpec::new(vec![0.0], vec![1.0], vec![4]).with_periodic(vec![true, false]);
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, GridError::Config { ref path, .. } if path == "#/grid/periodic"));
    }

    #[test]
    fn validate_rejects_zero_points() {
        let spec = GridSpec::new(vec![0.0], vec![1.0], vec![0]);
        let err = spec.validate().unwrap_err();
        assert!(
            matches!(err, GridError::Config { ref path, .. } if path == "#/grid/number_points/0")
        );
    }

    #[test]
    fn periodic_defaults_to_false() {
        let spec: GridSpec =
            serde_json::from_str(r#"{"lower":[0.0,1.0],"upper":[1.0,2.0],"number_points":[3,5]}"#)
                .unwrap();
        assert_eq!(spec.periodicity(), vec![false, false]);
        assert!(spec.validate().is_ok());
    }
}
