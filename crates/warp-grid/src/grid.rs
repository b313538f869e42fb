use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};
use crate::spec::GridSpec;

/// Dense N-dimensional grid over a box of collective-variable space.
///
/// Axis `d` is split into `num_points[d]` bins of width
/// `(upper[d] - lower[d]) / num_points[d]`; bin `n` covers
/// `[lower + n*delta, lower + (n+1)*delta)` and is positioned at its midpoint.
///
/// Non-periodic axes carry two extra cells: index `-1` collects everything
/// below `lower`, index `num_points` everything at or above `upper`. Periodic
/// axes accept any integer index and wrap it modulo `num_points`.
///
/// Storage is row-major over the per-axis extents (`num_points`, plus two on
/// non-periodic axes), first axis slowest.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<T> {
    num_points: Vec<usize>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    periodic: Vec<bool>,
    extents: Vec<usize>,
    data: Vec<T>,
}

impl<T: Clone + Default> Grid<T> {
    pub fn build(spec: &GridSpec) -> GridResult<Self> {
        Self::build_at(spec, "#/grid")
    }

    pub fn build_at(spec: &GridSpec, path: &str) -> GridResult<Self> {
        Self::build_filled_at(spec, path, T::default())
    }
}

impl<T: Clone> Grid<T> {
    pub fn build_filled(spec: &GridSpec, value: T) -> GridResult<Self> {
        Self::build_filled_at(spec, "#/grid", value)
    }

    pub fn build_filled_at(spec: &GridSpec, path: &str, value: T) -> GridResult<Self> {
        spec.validate_at(path)?;
        let periodic = spec.periodicity();
        let extents = extents_of(&spec.number_points, &periodic);
        let total = storage_len::<T>(&extents, path)?;
        Ok(Self {
            num_points: spec.number_points.clone(),
            lower: spec.lower.clone(),
            upper: spec.upper.clone(),
            periodic,
            extents,
            data: vec![value; total],
        })
    }

    pub fn fill(&mut self, value: T) {
        for slot in &mut self.data {
            *slot = value.clone();
        }
    }
}

impl<T> Grid<T> {
    /// Builds a grid around existing flattened storage.
    pub fn from_data(spec: &GridSpec, data: Vec<T>) -> GridResult<Self> {
        Self::from_data_at(spec, "#/grid", data)
    }

    pub fn from_data_at(spec: &GridSpec, path: &str, data: Vec<T>) -> GridResult<Self> {
        spec.validate_at(path)?;
        let periodic = spec.periodicity();
        let extents = extents_of(&spec.number_points, &periodic);
        let total = storage_len::<T>(&extents, path)?;
        if data.len() != total {
            return Err(GridError::config(
                format!("{path}/data"),
                format!("expected {total} elements, got {}", data.len()),
            ));
        }
        Ok(Self {
            num_points: spec.number_points.clone(),
            lower: spec.lower.clone(),
            upper: spec.upper.clone(),
            periodic,
            extents,
            data,
        })
    }

    pub fn dimension(&self) -> usize {
        self.num_points.len()
    }

    fn check_dim(&self, dim: usize) -> GridResult<()> {
        if dim >= self.dimension() {
            return Err(GridError::DimensionOutOfRange {
                dim,
                dimension: self.dimension(),
            });
        }
        Ok(())
    }

    pub fn num_points(&self, dim: usize) -> GridResult<usize> {
        self.check_dim(dim)?;
        Ok(self.num_points[dim])
    }

    pub fn lower(&self, dim: usize) -> GridResult<f64> {
        self.check_dim(dim)?;
        Ok(self.lower[dim])
    }

    pub fn upper(&self, dim: usize) -> GridResult<f64> {
        self.check_dim(dim)?;
        Ok(self.upper[dim])
    }

    pub fn periodic(&self, dim: usize) -> GridResult<bool> {
        self.check_dim(dim)?;
        Ok(self.periodic[dim])
    }

    /// Bin width along `dim`.
    pub fn spacing(&self, dim: usize) -> GridResult<f64> {
        self.check_dim(dim)?;
        Ok(self.delta(dim))
    }

    pub fn shape(&self) -> &[usize] {
        &self.num_points
    }

    pub fn lower_edges(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper_edges(&self) -> &[f64] {
        &self.upper
    }

    pub fn periodicity(&self) -> &[bool] {
        &self.periodic
    }

    pub fn spec(&self) -> GridSpec {
        GridSpec {
            lower: self.lower.clone(),
            upper: self.upper.clone(),
            number_points: self.num_points.clone(),
            periodic: Some(self.periodic.clone()),
        }
    }

    /// Number of stored cells, sentinel cells included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[inline]
    fn delta(&self, dim: usize) -> f64 {
        (self.upper[dim] - self.lower[dim]) / self.num_points[dim] as f64
    }

    fn axis_index(&self, dim: usize, x: f64) -> GridResult<i64> {
        if !x.is_finite() {
            return Err(GridError::NonFinite { dim, value: x });
        }
        let n = self.num_points[dim] as i64;
        let lo = self.lower[dim];
        let raw = ((x - lo) / self.delta(dim)).floor();
        if self.periodic[dim] {
            return Ok((raw as i64).rem_euclid(n));
        }
        if x < lo {
            Ok(-1)
        } else if x >= self.upper[dim] {
            Ok(n)
        } else {
            // floor can land on n for x just below upper
            Ok((raw as i64).clamp(0, n - 1))
        }
    }

    /// Grid indices of the bin containing `point`.
    pub fn indices_of(&self, point: &[f64]) -> GridResult<Vec<i64>> {
        if point.len() != self.dimension() {
            return Err(GridError::Mismatch {
                expected: self.dimension(),
                found: point.len(),
            });
        }
        point
            .iter()
            .enumerate()
            .map(|(dim, &x)| self.axis_index(dim, x))
            .collect()
    }

    fn out_of_range(&self, indices: &[i64]) -> GridError {
        GridError::IndexOutOfRange {
            indices: indices.to_vec(),
            shape: self.num_points.clone(),
            periodic: self.periodic.clone(),
        }
    }

    /// Position of `indices` in the flattened storage.
    pub fn flat_index(&self, indices: &[i64]) -> GridResult<usize> {
        if indices.len() != self.dimension() {
            return Err(GridError::Mismatch {
                expected: self.dimension(),
                found: indices.len(),
            });
        }
        let mut flat = 0usize;
        for (dim, &idx) in indices.iter().enumerate() {
            let n = self.num_points[dim] as i64;
            let slot = if self.periodic[dim] {
                idx.rem_euclid(n)
            } else {
                if idx < -1 || idx > n {
                    return Err(self.out_of_range(indices));
                }
                idx + 1
            };
            flat = flat * self.extents[dim] + slot as usize;
        }
        Ok(flat)
    }

    fn decode(&self, mut flat: usize) -> Vec<i64> {
        let dim = self.dimension();
        let mut indices = vec![0i64; dim];
        for d in (0..dim).rev() {
            let slot = (flat % self.extents[d]) as i64;
            flat /= self.extents[d];
            indices[d] = if self.periodic[d] { slot } else { slot - 1 };
        }
        indices
    }

    /// Inverse of [`Grid::flat_index`]; periodic components come back wrapped.
    pub fn indices_of_flat(&self, flat: usize) -> GridResult<Vec<i64>> {
        if flat >= self.data.len() {
            return Err(GridError::IndexOutOfRange {
                indices: vec![flat as i64],
                shape: self.num_points.clone(),
                periodic: self.periodic.clone(),
            });
        }
        Ok(self.decode(flat))
    }

    pub fn at(&self, indices: &[i64]) -> GridResult<&T> {
        let flat = self.flat_index(indices)?;
        Ok(&self.data[flat])
    }

    pub fn at_mut(&mut self, indices: &[i64]) -> GridResult<&mut T> {
        let flat = self.flat_index(indices)?;
        Ok(&mut self.data[flat])
    }

    /// Same as `at(indices_of(point))`.
    pub fn at_point(&self, point: &[f64]) -> GridResult<&T> {
        let indices = self.indices_of(point)?;
        self.at(&indices)
    }

    pub fn at_point_mut(&mut self, point: &[f64]) -> GridResult<&mut T> {
        let indices = self.indices_of(point)?;
        self.at_mut(&indices)
    }

    /// True when no component addresses an underflow/overflow cell.
    pub fn is_interior(&self, indices: &[i64]) -> bool {
        indices.len() == self.dimension()
            && indices.iter().enumerate().all(|(dim, &idx)| {
                self.periodic[dim] || (idx >= 0 && idx < self.num_points[dim] as i64)
            })
    }

    /// Midpoint of the bin addressed by `indices`.
    pub fn center(&self, indices: &[i64]) -> GridResult<Vec<f64>> {
        self.flat_index(indices)?;
        Ok(indices
            .iter()
            .enumerate()
            .map(|(dim, &idx)| {
                let idx = if self.periodic[dim] {
                    idx.rem_euclid(self.num_points[dim] as i64)
                } else {
                    idx
                };
                self.lower[dim] + (idx as f64 + 0.5) * self.delta(dim)
            })
            .collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Vec<i64>, &T)> + '_ {
        self.data
            .iter()
            .enumerate()
            .map(move |(flat, value)| (self.decode(flat), value))
    }

    pub fn same_layout<U>(&self, other: &Grid<U>) -> bool {
        self.num_points == other.num_points
            && self.lower == other.lower
            && self.upper == other.upper
            && self.periodic == other.periodic
    }

    pub fn map<U, F>(&self, f: F) -> Grid<U>
    where
        F: FnMut(&T) -> U,
    {
        Grid {
            num_points: self.num_points.clone(),
            lower: self.lower.clone(),
            upper: self.upper.clone(),
            periodic: self.periodic.clone(),
            extents: self.extents.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }
}

fn extents_of(num_points: &[usize], periodic: &[bool]) -> Vec<usize> {
    num_points
        .iter()
        .zip(periodic)
        .map(|(&n, &p)| if p { n } else { n.saturating_add(2) })
        .collect()
}

/// Cell count over all extents; a layout too large to address is a config error.
fn storage_len<T>(extents: &[usize], path: &str) -> GridResult<usize> {
    let elem = std::mem::size_of::<T>().max(1);
    extents
        .iter()
        .try_fold(1usize, |acc, &e| acc.checked_mul(e))
        .filter(|&total| {
            total
                .checked_mul(elem)
                .map_or(false, |bytes| bytes <= isize::MAX as usize)
        })
        .ok_or_else(|| {
            GridError::config(
                format!("{path}/number_points"),
                format!("grid with extents {extents:?} is too large to store"),
            )
        })
}

#[derive(Serialize)]
struct GridDocumentRef<'a, T> {
    lower: &'a [f64],
    upper: &'a [f64],
    number_points: &'a [usize],
    periodic: &'a [bool],
    data: &'a [T],
}

#[derive(Deserialize)]
struct GridDocument<T> {
    lower: Vec<f64>,
    upper: Vec<f64>,
    number_points: Vec<usize>,
    #[serde(default)]
    periodic: Option<Vec<bool>>,
    data: Vec<T>,
}

impl<T: Serialize> Serialize for Grid<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        GridDocumentRef {
            lower: &self.lower,
            upper: &self.upper,
            number_points: &self.num_points,
            periodic: &self.periodic,
            data: &self.data,
        }
        .serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Grid<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let doc = GridDocument::<T>::deserialize(deserializer)?;
        let spec = GridSpec {
            lower: doc.lower,
            upper: doc.upper,
            number_points: doc.number_points,
            periodic: doc.periodic,
        };
        Grid::from_data_at(&spec, "#", doc.data).map_err(de::Error::custom)
    }
}
