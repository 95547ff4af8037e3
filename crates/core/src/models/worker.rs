use serde::{Deserialize, Serialize};

use super::{ResourceVector, TaskId, WorkerId};

/// Free resources of one worker at one instant.
///
/// A measured baseline has no `causing_task`; timeline entries derived from
/// a task's start or end carry that task's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub timestamp: u64,
    pub worker: WorkerId,
    pub free_resources: ResourceVector,
    pub causing_task: Option<TaskId>,
}

impl WorkerSnapshot {
    /// Freshly measured state of `worker`.
    pub fn measured(timestamp: u64, worker: WorkerId, free_resources: ResourceVector) -> Self {
        Self {
            timestamp,
            worker,
            free_resources,
            causing_task: None,
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.causing_task.is_none()
    }
}
