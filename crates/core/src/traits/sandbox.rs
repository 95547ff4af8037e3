use std::sync::Arc;

use async_trait::async_trait;

use crate::{models::TaskPrediction, SchedulerResult};

/// Resource-isolation lifecycle confining one task to its predicted budget.
///
/// Calls arrive in the order create → attach → destroy, each authorised by
/// the credential configured for the task's worker.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn create(&self, credential: &str) -> SchedulerResult<()>;

    async fn attach(&self, credential: &str) -> SchedulerResult<()>;

    async fn destroy(&self, credential: &str) -> SchedulerResult<()>;
}

/// Builds a sandbox sized for one prediction.
pub trait SandboxProvider: Send + Sync {
    /// `None` means the task runs unconfined.
    fn build(&self, prediction: &TaskPrediction) -> Option<Arc<dyn Sandbox>>;
}
