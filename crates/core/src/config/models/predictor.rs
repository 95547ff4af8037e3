use serde::{Deserialize, Serialize};

/// Coefficients of a linear model trained out of process.
///
/// Output `k` is `intercepts[k] + Σ weights[k][i] * x[i] + rmse[k] * rmse_factor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModelConfig {
    pub weights: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
    #[serde(default)]
    pub rmse: Vec<f64>,
    #[serde(default)]
    pub rmse_factor: f64,
}

impl LinearModelConfig {
    pub fn outputs(&self) -> usize {
        self.weights.len()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.weights.is_empty() {
            return Err(anyhow::anyhow!("linear model needs at least one output"));
        }

        if self.intercepts.len() != self.weights.len() {
            return Err(anyhow::anyhow!(
                "linear model has {} weight rows but {} intercepts",
                self.weights.len(),
                self.intercepts.len()
            ));
        }

        if !self.rmse.is_empty() && self.rmse.len() != self.weights.len() {
            return Err(anyhow::anyhow!(
                "linear model has {} outputs but {} rmse values",
                self.weights.len(),
                self.rmse.len()
            ));
        }

        let inputs = self.weights[0].len();
        if self.weights.iter().any(|row| row.len() != inputs) {
            return Err(anyhow::anyhow!("linear model weight rows differ in length"));
        }

        Ok(())
    }
}

/// Two-stage predictor: input features → task score → [duration, resources…].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub scorer: LinearModelConfig,
    pub sizer: LinearModelConfig,
}

impl PredictorConfig {
    pub fn validate(&self, dimensions: usize) -> anyhow::Result<()> {
        self.scorer.validate()?;
        self.sizer.validate()?;

        if self.sizer.weights[0].len() != self.scorer.outputs() {
            return Err(anyhow::anyhow!(
                "sizer expects {} inputs but scorer produces {}",
                self.sizer.weights[0].len(),
                self.scorer.outputs()
            ));
        }

        if self.sizer.outputs() != dimensions + 1 {
            return Err(anyhow::anyhow!(
                "sizer must produce duration plus {} resources, got {} outputs",
                dimensions,
                self.sizer.outputs()
            ));
        }

        Ok(())
    }
}
