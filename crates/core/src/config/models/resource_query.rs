use serde::{Deserialize, Serialize};

/// How one free-resource component is derived from a worker's metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceFormula {
    /// The summed value of one metric is the free amount.
    Metric { name: String },
    /// `total - used`, e.g. `1.0 - cpu_usage_ratio`.
    Complement { total: f64, used: String },
    /// `capacity - used`, both read from metrics.
    Difference { capacity: String, used: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceQueryConfig {
    pub timeout_seconds: u64,
    /// One formula per resource dimension, in dimension order.
    pub formulas: Vec<ResourceFormula>,
}

impl Default for ResourceQueryConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            formulas: vec![
                ResourceFormula::Complement {
                    total: 1.0,
                    used: "worker_cpu_usage_ratio".to_string(),
                },
                ResourceFormula::Metric {
                    name: "worker_memory_available_bytes".to_string(),
                },
            ],
        }
    }
}

impl ResourceQueryConfig {
    pub fn validate(&self, dimensions: usize) -> anyhow::Result<()> {
        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("resource query timeout must be greater than 0"));
        }

        if self.formulas.len() != dimensions {
            return Err(anyhow::anyhow!(
                "{} resource formulas configured for {} dimensions",
                self.formulas.len(),
                dimensions
            ));
        }

        Ok(())
    }
}
