use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use balancer_core::{
    Clock, ResourceFormula, ResourceQuery, ResourceQueryConfig, ResourceVector, SchedulerError,
    SchedulerResult, WorkerEndpoint, WorkerId, WorkerSnapshot,
};

use crate::metrics_parser::MetricSet;

/// Measures free resources by scraping each worker's Prometheus endpoint.
pub struct PrometheusResourceQuery {
    client: reqwest::Client,
    endpoints: HashMap<WorkerId, String>,
    formulas: Vec<ResourceFormula>,
    clock: Arc<dyn Clock>,
}

impl PrometheusResourceQuery {
    pub fn new(
        config: &ResourceQueryConfig,
        workers: &[WorkerEndpoint],
        clock: Arc<dyn Clock>,
    ) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("cannot build HTTP client: {e}")))?;

        let endpoints = workers
            .iter()
            .map(|w| (w.worker_id(), w.metrics_url()))
            .collect();

        Ok(Self {
            client,
            endpoints,
            formulas: config.formulas.clone(),
            clock,
        })
    }

    /// Override the scrape URL of one worker.
    pub fn with_endpoint(mut self, worker: WorkerId, url: impl Into<String>) -> Self {
        self.endpoints.insert(worker, url.into());
        self
    }

    async fn scrape(&self, worker: &WorkerId, url: &str) -> SchedulerResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SchedulerError::resource_query(worker, e))?;

        response
            .text()
            .await
            .map_err(|e| SchedulerError::resource_query(worker, e))
    }
}

#[async_trait]
impl ResourceQuery for PrometheusResourceQuery {
    async fn query(&self, worker: &WorkerId) -> SchedulerResult<WorkerSnapshot> {
        let url = self
            .endpoints
            .get(worker)
            .ok_or_else(|| SchedulerError::resource_query(worker, "no metrics endpoint configured"))?;

        let body = self.scrape(worker, url).await?;
        let timestamp = self.clock.now();
        let free = evaluate(&self.formulas, &MetricSet::parse(&body), worker)?;

        debug!(worker = %worker, free = %free, "measured free resources");
        Ok(WorkerSnapshot::measured(timestamp, worker.clone(), free))
    }
}

/// Apply `formulas` to one scrape, one component per formula.
///
/// Negative results are reported as zero.
pub fn evaluate(
    formulas: &[ResourceFormula],
    metrics: &MetricSet,
    worker: &WorkerId,
) -> SchedulerResult<ResourceVector> {
    let metric = |name: &str| {
        metrics
            .sum(name)
            .ok_or_else(|| SchedulerError::resource_query(worker, format!("metric {name} is missing")))
    };

    let components = formulas
        .iter()
        .map(|formula| match formula {
            ResourceFormula::Metric { name } => metric(name),
            ResourceFormula::Complement { total, used } => Ok(total - metric(used)?),
            ResourceFormula::Difference { capacity, used } => Ok(metric(capacity)? - metric(used)?),
        })
        .collect::<SchedulerResult<Vec<f64>>>()?;

    let (free, clamped) = ResourceVector::new(components).clamp_non_negative();
    if clamped {
        warn!(worker = %worker, free = %free, "negative free resources reported as zero");
    }
    Ok(free)
}
