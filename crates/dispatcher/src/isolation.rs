//! Sandbox lifecycle around one remote call.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use balancer_core::{Sandbox, SchedulerResult, TaskId};

/// Explicit create/attach → run → destroy bracket.
///
/// `before` must succeed for the task to run. `after` never fails: a destroy
/// error is logged and the task's own outcome is kept.
pub struct SandboxBracket {
    task_id: TaskId,
    sandbox: Arc<dyn Sandbox>,
    credential: String,
}

impl SandboxBracket {
    pub fn new(task_id: TaskId, sandbox: Arc<dyn Sandbox>, credential: impl Into<String>) -> Self {
        Self {
            task_id,
            sandbox,
            credential: credential.into(),
        }
    }

    /// Create the sandbox and attach to it.
    ///
    /// When attaching fails the freshly created sandbox is torn down before
    /// the error is returned.
    pub async fn before(&self) -> SchedulerResult<()> {
        self.sandbox.create(&self.credential).await?;

        if let Err(e) = self.sandbox.attach(&self.credential).await {
            if let Err(destroy) = self.sandbox.destroy(&self.credential).await {
                warn!(
                    task_id = %self.task_id,
                    error = %destroy,
                    "failed to destroy sandbox after attach failure"
                );
            }
            return Err(e);
        }

        debug!(task_id = %self.task_id, "sandbox ready");
        Ok(())
    }

    pub async fn after(&self) {
        match self.sandbox.destroy(&self.credential).await {
            Ok(()) => debug!(task_id = %self.task_id, "sandbox destroyed"),
            Err(e) => warn!(task_id = %self.task_id, error = %e, "failed to destroy sandbox"),
        }
    }

    /// Run `work` inside the bracket.
    pub async fn run<F, T>(&self, work: F) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        self.before().await?;
        let outcome = work.await;
        self.after().await;
        outcome
    }
}
