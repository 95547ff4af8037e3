//! Turning task features into a duration and a resource vector.

use std::sync::Arc;

use tracing::{debug, warn};

use balancer_core::{LinearModelConfig, PredictorConfig, Predictor, ResourceVector, TaskDuration};

/// Linear model with coefficients trained out of process.
///
/// Each output carries a safety margin of `rmse * rmse_factor` so that
/// predictions err on the side of over-reserving.
#[derive(Debug, Clone)]
pub struct LinearPredictor {
    weights: Vec<Vec<f64>>,
    intercepts: Vec<f64>,
    margins: Vec<f64>,
}

impl LinearPredictor {
    pub fn from_config(config: &LinearModelConfig) -> Self {
        let margins = (0..config.outputs())
            .map(|k| config.rmse.get(k).copied().unwrap_or(0.0) * config.rmse_factor)
            .collect();

        Self {
            weights: config.weights.clone(),
            intercepts: config.intercepts.clone(),
            margins,
        }
    }
}

impl Predictor for LinearPredictor {
    fn predict(&self, x: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.intercepts)
            .zip(&self.margins)
            .map(|((row, intercept), margin)| {
                let dot: f64 = row.iter().zip(x).map(|(w, v)| w * v).sum();
                intercept + dot + margin
            })
            .collect()
    }
}

/// Duration and resource demand of one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub duration: TaskDuration,
    pub resources: ResourceVector,
}

/// Scorer → sizer pipeline.
///
/// The sizer's first output is the duration in nanoseconds, the remaining
/// ones are resource demands. Negative and NaN outputs are clamped to zero.
#[derive(Clone)]
pub struct PredictorChain {
    scorer: Arc<dyn Predictor>,
    sizer: Arc<dyn Predictor>,
    dimensions: usize,
}

impl PredictorChain {
    pub fn new(scorer: Arc<dyn Predictor>, sizer: Arc<dyn Predictor>, dimensions: usize) -> Self {
        Self {
            scorer,
            sizer,
            dimensions,
        }
    }

    pub fn from_config(config: &PredictorConfig, dimensions: usize) -> Self {
        Self::new(
            Arc::new(LinearPredictor::from_config(&config.scorer)),
            Arc::new(LinearPredictor::from_config(&config.sizer)),
            dimensions,
        )
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn predict(&self, features: &[f64]) -> Prediction {
        let score = self.scorer.predict(features);
        let mut raw = self.sizer.predict(&score);

        let expected = self.dimensions + 1;
        if raw.len() != expected {
            warn!(
                expected,
                actual = raw.len(),
                "sizer output has the wrong length, padding or truncating"
            );
            raw.resize(expected, 0.0);
        }

        let (clamped, changed) = ResourceVector::new(raw.clone()).clamp_non_negative();
        if changed {
            debug!(raw = ?raw, clamped = %clamped, "clamped negative or NaN prediction");
        }

        let components = clamped.components();
        Prediction {
            duration: TaskDuration::from_prediction(components[0]),
            resources: ResourceVector::new(components[1..].to_vec()),
        }
    }
}

impl std::fmt::Debug for PredictorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictorChain")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

/// Prediction used when no predictor chain is configured.
pub fn unpredicted() -> Prediction {
    Prediction {
        duration: TaskDuration::Unknown,
        resources: ResourceVector::zeros(1),
    }
}
