use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};

use balancer_core::{AppConfig, Clock, MonotonicClock, RemoteTask};
use balancer_dispatcher::{LoadBalancer, ScheduledHandle};
use balancer_worker::{
    install_exporter, HostMonitor, PrometheusResourceQuery, TaskHandlerRegistry,
    TcpRemoteExecutor, WorkerNode,
};

use crate::shutdown::ShutdownManager;

/// One task to push through the dispatcher.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub task: String,
    pub payload: serde_json::Value,
    pub features: Vec<f64>,
}

#[derive(Debug, Clone)]
pub enum AppMode {
    Worker,
    Submit(SubmitRequest),
}

pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        Self { config, mode }
    }

    pub async fn run(self, shutdown: ShutdownManager) -> Result<()> {
        match &self.mode {
            AppMode::Worker => self.run_worker(&shutdown).await,
            AppMode::Submit(request) => {
                let shutdown_rx = shutdown.subscribe().await;
                self.run_submit(request, shutdown_rx).await
            }
        }
    }

    async fn run_worker(&self, shutdown: &ShutdownManager) -> Result<()> {
        let node_config = &self.config.worker_node;

        if node_config.monitoring_address.is_empty() {
            info!("host monitoring disabled");
        } else {
            let address: SocketAddr = node_config.monitoring_address.parse().with_context(|| {
                format!("invalid monitoring address: {}", node_config.monitoring_address)
            })?;
            install_exporter(address)?;

            let monitor = HostMonitor::new(Duration::from_millis(node_config.sample_interval_ms));
            tokio::spawn(monitor.run(shutdown.subscribe().await));
        }

        let registry = TaskHandlerRegistry::with_builtins().await;
        let node = WorkerNode::bind(
            &node_config.listen_address,
            registry,
            node_config.max_frame_bytes,
        )
        .await?;

        node.run(shutdown.subscribe().await).await?;
        Ok(())
    }

    async fn run_submit(
        &self,
        request: &SubmitRequest,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let balancer = build_balancer(&self.config)?;
        info!(
            scheduler = balancer.scheduler_name(),
            workers = balancer.workers().len(),
            "dispatcher ready"
        );

        let task = RemoteTask::new(request.task.clone(), request.payload.clone());
        let handle = balancer
            .submit(task, &request.features)
            .await
            .context("task was not admitted")?;

        let prediction = handle.prediction();
        info!(task_id = %prediction.id, worker = %prediction.worker, "waiting for result");

        let result = tokio::select! {
            result = handle.wait() => result,
            _ = shutdown_rx.recv() => {
                warn!(task_id = %prediction.id, "cancelling task on shutdown");
                handle.cancel();
                handle.wait().await
            }
        };

        report(&handle);
        let value = result.context("task failed")?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok(())
    }
}

/// Dispatcher wired to TCP worker nodes and their Prometheus endpoints.
pub fn build_balancer(config: &AppConfig) -> Result<LoadBalancer> {
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

    let executor = TcpRemoteExecutor::new(Duration::from_secs(config.dispatcher.remote_timeout_seconds))
        .with_max_frame_bytes(config.worker_node.max_frame_bytes);
    let resource_query =
        PrometheusResourceQuery::new(&config.resource_query, &config.workers, Arc::clone(&clock))?;

    let balancer = LoadBalancer::from_config(
        config,
        Arc::new(executor),
        Arc::new(resource_query),
        clock,
    )?;
    Ok(balancer)
}

fn report(handle: &ScheduledHandle) {
    let times = handle.execution_times();
    info!(
        queued_at = %times.queued_at_utc,
        waited_ms = times.waited().map(|d| d.as_millis() as u64),
        processed_ms = times.processed().map(|d| d.as_millis() as u64),
        retained_ms = times.retained().map(|d| d.as_millis() as u64),
        "task timing"
    );
}
