use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed-dimension vector of resource amounts, e.g. `[cpu_share, memory_bytes]`.
///
/// Comparisons and arithmetic treat a missing trailing component as zero, so
/// the one-element default vector used without a predictor fits anywhere.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVector(Vec<f64>);

impl ResourceVector {
    pub fn new(components: Vec<f64>) -> Self {
        ResourceVector(components)
    }

    pub fn zeros(dimensions: usize) -> Self {
        ResourceVector(vec![0.0; dimensions])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn components(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0.get(index).copied().unwrap_or(0.0)
    }

    /// True when every demanded component is covered by `free`.
    pub fn fits_within(&self, free: &ResourceVector) -> bool {
        self.0
            .iter()
            .enumerate()
            .all(|(i, demand)| *demand <= free.get(i))
    }

    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        let len = self.len().max(other.len());
        ResourceVector((0..len).map(|i| self.get(i) + other.get(i)).collect())
    }

    pub fn negated(&self) -> ResourceVector {
        ResourceVector(self.0.iter().map(|v| -v).collect())
    }

    /// Replace negative and NaN components with zero.
    ///
    /// Returns the clamped vector and whether anything was changed.
    pub fn clamp_non_negative(&self) -> (ResourceVector, bool) {
        let mut changed = false;
        let clamped = self
            .0
            .iter()
            .map(|v| {
                if v.is_nan() || *v < 0.0 {
                    changed = true;
                    0.0
                } else {
                    *v
                }
            })
            .collect();
        (ResourceVector(clamped), changed)
    }
}

impl From<Vec<f64>> for ResourceVector {
    fn from(components: Vec<f64>) -> Self {
        ResourceVector(components)
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
