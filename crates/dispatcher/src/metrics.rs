use std::time::Duration;

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

/// Dispatcher telemetry, recorded through the global `metrics` recorder.
///
/// Without an installed recorder every handle is a no-op.
#[derive(Clone)]
pub struct DispatchMetrics {
    // Submission metrics
    tasks_submitted_total: Counter,
    scheduling_failures_total: Counter,

    // Execution metrics
    task_wait: Histogram,
    task_process: Histogram,
    task_failures_total: Counter,
    task_cancellations_total: Counter,

    // Chain metrics
    pending_chains: Gauge,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self {
            tasks_submitted_total: counter!("balancer_tasks_submitted_total"),
            scheduling_failures_total: counter!("balancer_scheduling_failures_total"),
            task_wait: histogram!("balancer_task_wait_seconds"),
            task_process: histogram!("balancer_task_process_seconds"),
            task_failures_total: counter!("balancer_task_failures_total"),
            task_cancellations_total: counter!("balancer_task_cancellations_total"),
            pending_chains: gauge!("balancer_pending_chains"),
        }
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted_total.increment(1);
    }

    pub fn record_scheduling_failure(&self) {
        self.scheduling_failures_total.increment(1);
    }

    pub fn record_finished(&self, waited: Option<Duration>, processed: Option<Duration>) {
        if let Some(waited) = waited {
            self.task_wait.record(waited.as_secs_f64());
        }
        if let Some(processed) = processed {
            self.task_process.record(processed.as_secs_f64());
        }
    }

    pub fn record_failure(&self) {
        self.task_failures_total.increment(1);
    }

    pub fn record_cancellation(&self) {
        self.task_cancellations_total.increment(1);
    }

    pub fn set_pending_chains(&self, count: usize) {
        self.pending_chains.set(count as f64);
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}
