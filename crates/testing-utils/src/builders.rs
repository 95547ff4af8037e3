//! Test data builders with sensible defaults.

use balancer_core::{
    RemoteTask, ResourceVector, TaskDuration, TaskId, TaskPrediction, WorkerEndpoint, WorkerId,
};
use std::sync::Arc;

/// Endpoints for `addresses`, each with credential `cred-<index>`.
pub fn endpoints(addresses: &[&str]) -> Vec<WorkerEndpoint> {
    addresses
        .iter()
        .enumerate()
        .map(|(i, address)| WorkerEndpoint {
            address: address.to_string(),
            credential: format!("cred-{i}"),
            monitoring_port: 42042,
        })
        .collect()
}

pub fn worker_ids(addresses: &[&str]) -> Vec<WorkerId> {
    addresses.iter().map(|a| WorkerId::new(*a)).collect()
}

pub fn remote_task(name: &str) -> RemoteTask {
    RemoteTask::new(name, serde_json::Value::Null)
}

/// Builder for hand-made [`TaskPrediction`]s.
pub struct PredictionBuilder {
    task: RemoteTask,
    start_time: u64,
    duration: TaskDuration,
    worker: WorkerId,
    resources: ResourceVector,
    predecessor: Option<TaskId>,
}

impl PredictionBuilder {
    pub fn new() -> Self {
        Self {
            task: remote_task("test_task"),
            start_time: 0,
            duration: TaskDuration::Known(100),
            worker: WorkerId::new("127.0.0.1:42043"),
            resources: ResourceVector::new(vec![0.5, 500.0]),
            predecessor: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task = remote_task(name);
        self
    }

    pub fn with_start(mut self, start_time: u64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_duration(mut self, duration: TaskDuration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_worker(mut self, worker: &str) -> Self {
        self.worker = WorkerId::new(worker);
        self
    }

    pub fn with_resources(mut self, resources: Vec<f64>) -> Self {
        self.resources = ResourceVector::new(resources);
        self
    }

    pub fn after(mut self, predecessor: TaskId) -> Self {
        self.predecessor = Some(predecessor);
        self
    }

    pub fn build(self) -> TaskPrediction {
        TaskPrediction::new(
            Arc::new(self.task),
            self.start_time,
            self.duration,
            self.worker,
            self.resources,
            self.predecessor,
        )
    }
}

impl Default for PredictionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
