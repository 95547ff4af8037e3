use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    models::{RemoteTask, ResourceVector, TaskDuration, TaskPrediction, WorkerId},
    SchedulerResult,
};

/// Admission strategy deciding on which worker and when a task runs.
///
/// Predictions move waiting → started → finished. All operations mutate
/// shared state and implementations serialize them internally.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Find a slot for `task`.
    ///
    /// `workers` is an ordered candidate list; ties are broken by its order.
    /// Fails with `SchedulingFailure` when no candidate can ever host the
    /// requested resources.
    async fn schedule(
        &self,
        task: Arc<RemoteTask>,
        duration: TaskDuration,
        resources: ResourceVector,
        workers: &[WorkerId],
    ) -> SchedulerResult<Arc<TaskPrediction>>;

    /// Execution of `prediction` began.
    fn started(&self, _prediction: &TaskPrediction) {}

    /// Execution of `prediction` ended, successfully or not.
    ///
    /// Unknown or already finished predictions are ignored.
    fn finished(&self, _prediction: &TaskPrediction) {}

    /// Strategy name used in logs.
    fn name(&self) -> &str;
}
