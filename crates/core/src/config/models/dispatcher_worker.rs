use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::WorkerId;

/// Admission strategy used by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Per-worker FIFO chaining without resource inspection.
    Simple,
    /// Resource-timeline admission control.
    Timeline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub scheduler: SchedulerKind,
    /// Dimensionality of every resource vector, fixed for the process lifetime.
    pub dimensions: usize,
    /// Upper bound on concurrently running remote calls, 0 for unbounded.
    pub max_in_flight: usize,
    pub remote_timeout_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::Timeline,
            dimensions: 2,
            max_in_flight: 0,
            remote_timeout_seconds: 300,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dimensions == 0 {
            return Err(anyhow::anyhow!("resource dimensions must be greater than 0"));
        }

        if self.remote_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("remote timeout must be greater than 0"));
        }

        Ok(())
    }
}

/// One worker node known to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    /// `host:port` of the execution endpoint.
    pub address: String,
    /// Credential handed to the sandbox lifecycle on this worker.
    #[serde(default)]
    pub credential: String,
    #[serde(default = "default_monitoring_port")]
    pub monitoring_port: u16,
}

fn default_monitoring_port() -> u16 {
    42042
}

impl WorkerEndpoint {
    pub fn worker_id(&self) -> WorkerId {
        WorkerId::new(self.address.clone())
    }

    /// URL of the worker's Prometheus endpoint.
    pub fn metrics_url(&self) -> String {
        let id = self.worker_id();
        let host = id.host();
        if host.contains(':') {
            format!("http://[{}]:{}/metrics", host, self.monitoring_port)
        } else {
            format!("http://{}:{}/metrics", host, self.monitoring_port)
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.address.is_empty() {
            return Err(anyhow::anyhow!("worker address must not be empty"));
        }

        match self.address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
            _ => Err(anyhow::anyhow!(
                "worker address must be host:port, got {}",
                self.address
            )),
        }
    }
}

pub(crate) fn validate_workers(workers: &[WorkerEndpoint]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for worker in workers {
        worker.validate()?;
        if !seen.insert(worker.address.as_str()) {
            return Err(anyhow::anyhow!("duplicate worker address: {}", worker.address));
        }
    }
    Ok(())
}

/// Settings of a worker node process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerNodeConfig {
    pub listen_address: String,
    /// Prometheus endpoint address, empty to disable host monitoring.
    pub monitoring_address: String,
    pub sample_interval_ms: u64,
    /// Largest accepted request frame.
    pub max_frame_bytes: usize,
}

impl Default for WorkerNodeConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:42043".to_string(),
            monitoring_address: "0.0.0.0:42042".to_string(),
            sample_interval_ms: 1_000,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl WorkerNodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen_address.is_empty() {
            return Err(anyhow::anyhow!("listen address must not be empty"));
        }

        if self.sample_interval_ms == 0 {
            return Err(anyhow::anyhow!("sample interval must be greater than 0"));
        }

        if self.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("max frame size must be greater than 0"));
        }

        Ok(())
    }
}
