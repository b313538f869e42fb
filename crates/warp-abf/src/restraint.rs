use crate::config::RestraintSpec;

/// Generalized force of a flat-bottom harmonic wall.
///
/// Zero inside `[min, max]`, linear in the violation outside, pointing back
/// into the allowed interval.
pub fn restraint_force(value: f64, spec: &RestraintSpec) -> f64 {
    if value < spec.min {
        spec.spring_constant * (spec.min - value)
    } else if value > spec.max {
        -spec.spring_constant * (value - spec.max)
    } else {
        0.0
    }
}

pub fn restraint_energy(value: f64, spec: &RestraintSpec) -> f64 {
    let d = if value < spec.min {
        spec.min - value
    } else if value > spec.max {
        value - spec.max
    } else {
        0.0
    };
    0.5 * spec.spring_constant * d * d
}

#[derive(Clone, Debug, Default)]
pub struct RestraintEvaluator {
    specs: Vec<Option<RestraintSpec>>,
}

impl RestraintEvaluator {
    pub fn new(specs: Vec<Option<RestraintSpec>>) -> Self {
        Self { specs }
    }

    /// Per-CV wall forces; unrestrained CVs get zero.
    pub fn evaluate(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(&self.specs)
            .map(|(&x, spec)| spec.as_ref().map_or(0.0, |s| restraint_force(x, s)))
            .collect()
    }

    pub fn energy(&self, values: &[f64]) -> f64 {
        values
            .iter()
            .zip(&self.specs)
            .map(|(&x, spec)| spec.as_ref().map_or(0.0, |s| restraint_energy(x, s)))
            .sum()
    }
}
