//! Host resource gauges published for the dispatcher's resource queries.

use std::net::SocketAddr;
use std::time::Duration;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use balancer_core::{SchedulerError, SchedulerResult};

pub const CPU_USAGE_RATIO: &str = "worker_cpu_usage_ratio";
pub const MEMORY_AVAILABLE_BYTES: &str = "worker_memory_available_bytes";
pub const MEMORY_TOTAL_BYTES: &str = "worker_memory_total_bytes";

/// One reading of the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSample {
    /// Busy share of all CPUs, between 0 and 1.
    pub cpu_usage_ratio: f64,
    pub memory_available_bytes: u64,
    pub memory_total_bytes: u64,
}

/// Periodically samples CPU and memory into `metrics` gauges.
pub struct HostMonitor {
    system: System,
    interval: Duration,
}

impl HostMonitor {
    pub fn new(interval: Duration) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        Self { system, interval }
    }

    pub fn sample(&mut self) -> HostSample {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();

        HostSample {
            cpu_usage_ratio: (f64::from(self.system.global_cpu_usage()) / 100.0).clamp(0.0, 1.0),
            memory_available_bytes: self.system.available_memory(),
            memory_total_bytes: self.system.total_memory(),
        }
    }

    fn publish(sample: &HostSample) {
        metrics::gauge!(CPU_USAGE_RATIO).set(sample.cpu_usage_ratio);
        metrics::gauge!(MEMORY_AVAILABLE_BYTES).set(sample.memory_available_bytes as f64);
        metrics::gauge!(MEMORY_TOTAL_BYTES).set(sample.memory_total_bytes as f64);
    }

    /// Sample every interval until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sample = self.sample();
                    debug!(
                        cpu = sample.cpu_usage_ratio,
                        available = sample.memory_available_bytes,
                        "host sample"
                    );
                    Self::publish(&sample);
                }
                _ = shutdown.recv() => {
                    debug!("host monitor stopped");
                    return;
                }
            }
        }
    }
}

/// Install the global Prometheus recorder and serve it on `address`.
///
/// Must run inside a tokio runtime.
pub fn install_exporter(address: SocketAddr) -> SchedulerResult<()> {
    let (recorder, exporter) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(address)
        .build()
        .map_err(|e| SchedulerError::Configuration(format!("failed to create Prometheus exporter: {e}")))?;

    metrics::set_global_recorder(recorder)
        .map_err(|e| SchedulerError::Configuration(format!("failed to install metrics recorder: {e}")))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            error!(error = ?e, "Prometheus exporter stopped");
        }
    });

    info!(address = %address, "Prometheus exporter listening");
    Ok(())
}
