//! Remote execution seam.
//!
//! A [`RemoteExecutor`] ships one [`RemoteTask`] to a worker and blocks until
//! the worker answers. Any transport or decoding problem surfaces as
//! `SchedulerError::RemoteExecution`; failures reported by the task itself
//! surface as `SchedulerError::TaskExecution`.

use async_trait::async_trait;

use crate::{
    models::{RemoteTask, WorkerId},
    SchedulerResult,
};

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `task` on `worker` and return its result.
    async fn execute(&self, worker: &WorkerId, task: &RemoteTask)
        -> SchedulerResult<serde_json::Value>;

    fn name(&self) -> &str;
}
