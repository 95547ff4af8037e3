use thiserror::Error;

use crate::models::{TaskId, WorkerId};

/// Balancer error type shared by every crate in the workspace.
///
/// Variants carry owned strings rather than source errors so that a single
/// outcome can be cloned into every observer of a task handle.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulerError {
    #[error("no feasible worker/start time: {reason}")]
    SchedulingFailure { reason: String },

    #[error("remote execution on {worker} failed: {message}")]
    RemoteExecution { worker: WorkerId, message: String },

    #[error("sandbox {phase} failed: {message}")]
    Sandbox { phase: SandboxPhase, message: String },

    #[error("resource query for {worker} failed: {message}")]
    ResourceQuery { worker: WorkerId, message: String },

    #[error("task {0} was cancelled")]
    Cancelled(TaskId),

    #[error("timed out waiting for task {0}")]
    Timeout(TaskId),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("task execution error: {0}")]
    TaskExecution(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Lifecycle phase of a sandbox bracket, used to label sandbox failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxPhase {
    Create,
    Attach,
    Destroy,
}

impl std::fmt::Display for SandboxPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SandboxPhase::Create => "create",
            SandboxPhase::Attach => "attach",
            SandboxPhase::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

impl SchedulerError {
    pub fn scheduling(reason: impl Into<String>) -> Self {
        SchedulerError::SchedulingFailure {
            reason: reason.into(),
        }
    }

    pub fn remote(worker: &WorkerId, message: impl std::fmt::Display) -> Self {
        SchedulerError::RemoteExecution {
            worker: worker.clone(),
            message: message.to_string(),
        }
    }

    pub fn sandbox(phase: SandboxPhase, message: impl std::fmt::Display) -> Self {
        SchedulerError::Sandbox {
            phase,
            message: message.to_string(),
        }
    }

    pub fn resource_query(worker: &WorkerId, message: impl std::fmt::Display) -> Self {
        SchedulerError::ResourceQuery {
            worker: worker.clone(),
            message: message.to_string(),
        }
    }

    /// Whether the error was raised before any remote work happened.
    pub fn is_scheduling_failure(&self) -> bool {
        matches!(self, SchedulerError::SchedulingFailure { .. })
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// Unified result type.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
