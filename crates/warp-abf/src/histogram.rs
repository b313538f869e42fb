use warp_grid::{Grid, GridSpec};

use crate::error::{AbfError, AbfResult};

/// Running per-bin sums of the generalized force and hit counts.
///
/// Both grids share one layout; sentinel bins of non-periodic axes are
/// accumulated like any other bin.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    n_cvs: usize,
    forces: Grid<Vec<f64>>,
    counts: Grid<u64>,
}

impl Histogram {
    pub fn new(spec: &GridSpec) -> AbfResult<Self> {
        let n_cvs = spec.dimension();
        let forces = Grid::build_filled_at(spec, "#/cvs", vec![0.0; n_cvs])?;
        let counts = Grid::build_at(spec, "#/cvs")?;
        Ok(Self {
            n_cvs,
            forces,
            counts,
        })
    }

    pub fn n_cvs(&self) -> usize {
        self.n_cvs
    }

    /// Number of bins, sentinel bins included.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &Grid<u64> {
        &self.counts
    }

    pub fn forces(&self) -> &Grid<Vec<f64>> {
        &self.forces
    }

    pub fn record(&mut self, indices: &[i64], sample: &[f64]) -> AbfResult<()> {
        if sample.len() != self.n_cvs {
            return Err(AbfError::Mismatch(format!(
                "force sample has {} components for {} CVs",
                sample.len(),
                self.n_cvs
            )));
        }
        let slot = self.forces.at_mut(indices)?;
        for (acc, value) in slot.iter_mut().zip(sample) {
            *acc += value;
        }
        *self.counts.at_mut(indices)? += 1;
        Ok(())
    }

    pub fn count(&self, indices: &[i64]) -> AbfResult<u64> {
        Ok(*self.counts.at(indices)?)
    }

    pub fn force_sum(&self, indices: &[i64]) -> AbfResult<&[f64]> {
        Ok(self.forces.at(indices)?.as_slice())
    }

    /// `F / max(N, min_count)`; an empty divisor gives zero, never NaN.
    pub fn mean_force(&self, indices: &[i64], min_count: u64) -> AbfResult<Vec<f64>> {
        let divisor = self.count(indices)?.max(min_count);
        let sums = self.force_sum(indices)?;
        if divisor == 0 {
            return Ok(vec![0.0; self.n_cvs]);
        }
        let divisor = divisor as f64;
        Ok(sums.iter().map(|f| f / divisor).collect())
    }

    pub fn total_hits(&self) -> u64 {
        self.counts.data().iter().sum()
    }

    /// Force sums flattened bin-major: `[bin0_cv0, bin0_cv1, ..., bin1_cv0, ...]`.
    pub fn flat_forces(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.n_bins() * self.n_cvs);
        for slot in self.forces.data() {
            out.extend_from_slice(slot);
        }
        out
    }

    pub fn flat_counts(&self) -> &[u64] {
        self.counts.data()
    }

    /// Replaces the statistics with flattened arrays in the layout of
    /// [`Histogram::flat_forces`] / [`Histogram::flat_counts`].
    pub fn load_flat(&mut self, forces: &[f64], counts: &[u64]) -> AbfResult<()> {
        if forces.len() != self.n_bins() * self.n_cvs {
            return Err(AbfError::Mismatch(format!(
                "expected {} force entries, got {}",
                self.n_bins() * self.n_cvs,
                forces.len()
            )));
        }
        if counts.len() != self.n_bins() {
            return Err(AbfError::Mismatch(format!(
                "expected {} count entries, got {}",
                self.n_bins(),
                counts.len()
            )));
        }
        for (slot, chunk) in self
            .forces
            .data_mut()
            .iter_mut()
            .zip(forces.chunks_exact(self.n_cvs))
        {
            slot.copy_from_slice(chunk);
        }
        self.counts.data_mut().copy_from_slice(counts);
        Ok(())
    }

    /// Adds another histogram of identical layout into this one.
    pub fn accumulate(&mut self, other: &Histogram) -> AbfResult<()> {
        if !self.counts.same_layout(&other.counts) || self.n_cvs != other.n_cvs {
            return Err(AbfError::Mismatch(
                "histograms have different grid layouts".into(),
            ));
        }
        for (dst, src) in self.forces.data_mut().iter_mut().zip(other.forces.data()) {
            for (a, b) in dst.iter_mut().zip(src) {
                *a += b;
            }
        }
        for (dst, src) in self.counts.data_mut().iter_mut().zip(other.counts.data()) {
            *dst += src;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.forces.fill(vec![0.0; self.n_cvs]);
        self.counts.fill(0);
    }
}
