use async_trait::async_trait;

use crate::{
    models::{WorkerId, WorkerSnapshot},
    SchedulerResult,
};

/// Source of a worker's currently free resources.
#[async_trait]
pub trait ResourceQuery: Send + Sync {
    /// Measure `worker` now. The snapshot carries no causing task.
    async fn query(&self, worker: &WorkerId) -> SchedulerResult<WorkerSnapshot>;
}
