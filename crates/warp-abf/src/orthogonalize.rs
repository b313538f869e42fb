//! Projection of atomic momenta onto CV directions.
//!
//! Each CV direction `W_i` starts as the flattened gradient of the CV. With
//! orthogonalization enabled, the components along the already processed
//! directions `W_k, k < i` are removed (classical Gram-Schmidt). `W_i` is
//! then scaled so that `W_i . grad_i == 1`, which turns `W_i . p` into the
//! momentum conjugate to the CV.

use nalgebra::DVector;

use crate::engine::Vec3;
use crate::error::{AbfError, AbfResult};

const VANISHING: f64 = 1.0e-12;

#[derive(Clone, Debug)]
pub struct Projection {
    weights: Vec<DVector<f64>>,
    /// Norm of the component removed by orthogonalization, per CV.
    pub corrections: Vec<f64>,
    /// `W_i . grad_i` before scaling, per CV.
    pub normalizations: Vec<f64>,
}

fn flatten(gradient: &[Vec3]) -> DVector<f64> {
    DVector::from_iterator(
        gradient.len() * 3,
        gradient.iter().flat_map(|g| [g.x, g.y, g.z]),
    )
}

impl Projection {
    /// Builds the CV directions; `None` when a direction degenerates (zero
    /// gradient, or a gradient parallel to an earlier CV).
    pub fn build(gradients: &[&[Vec3]], orthogonalize: bool) -> AbfResult<Option<Self>> {
        let n_atoms = gradients.first().map_or(0, |g| g.len());
        if let Some((i, g)) = gradients
            .iter()
            .enumerate()
            .find(|(_, g)| g.len() != n_atoms)
        {
            return Err(AbfError::Mismatch(format!(
                "gradient of CV {i} has {} atoms, expected {n_atoms}",
                g.len()
            )));
        }

        let mut basis: Vec<DVector<f64>> = Vec::with_capacity(gradients.len());
        let mut weights = Vec::with_capacity(gradients.len());
        let mut corrections = Vec::with_capacity(gradients.len());
        let mut normalizations = Vec::with_capacity(gradients.len());
        for gradient in gradients {
            let grad = flatten(gradient);
            let mut w = grad.clone();
            if orthogonalize {
                let mut removed = DVector::zeros(w.len());
                for u in &basis {
                    let uu = u.dot(u);
                    if uu > VANISHING {
                        removed += u * (grad.dot(u) / uu);
                    }
                }
                w -= &removed;
                corrections.push(removed.norm());
                basis.push(w.clone());
            } else {
                corrections.push(0.0);
            }
            let norm = w.dot(&grad);
            if norm.abs() < VANISHING {
                return Ok(None);
            }
            normalizations.push(norm);
            weights.push(w / norm);
        }
        Ok(Some(Self {
            weights,
            corrections,
            normalizations,
        }))
    }

    pub fn dimension(&self) -> usize {
        self.weights.len()
    }

    pub fn weight(&self, cv: usize) -> &DVector<f64> {
        &self.weights[cv]
    }

    /// `W_i . p` for every CV.
    pub fn project(&self, momenta: &[Vec3]) -> AbfResult<Vec<f64>> {
        let p = flatten(momenta);
        self.weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                if w.len() != p.len() {
                    return Err(AbfError::Mismatch(format!(
                        "CV {i} spans {} atoms but snapshot has {}",
                        w.len() / 3,
                        momenta.len()
                    )));
                }
                Ok(w.dot(&p))
            })
            .collect()
    }
}
