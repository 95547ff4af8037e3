use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::{RemoteTask, ResourceVector, TaskDuration, TaskId, WorkerId};

/// Scheduling decision for one task.
///
/// Created once by a scheduler and never mutated. The waiting, started and
/// finished states live in the scheduler's own collections, keyed by `id`.
#[derive(Debug, Clone)]
pub struct TaskPrediction {
    pub id: TaskId,
    pub task: Arc<RemoteTask>,
    /// Planned start, nanoseconds on the balancer's monotonic clock.
    pub start_time: u64,
    pub duration: TaskDuration,
    pub worker: WorkerId,
    pub resources: ResourceVector,
    /// Task this one is chained after on the same worker.
    pub predecessor: Option<TaskId>,
}

impl TaskPrediction {
    pub fn new(
        task: Arc<RemoteTask>,
        start_time: u64,
        duration: TaskDuration,
        worker: WorkerId,
        resources: ResourceVector,
        predecessor: Option<TaskId>,
    ) -> Self {
        Self {
            id: TaskId::next(),
            task,
            start_time,
            duration,
            worker,
            resources,
            predecessor,
        }
    }

    /// Planned end instant, `None` for an unknown duration.
    pub fn end_time(&self) -> Option<u64> {
        self.duration.end_from(self.start_time)
    }
}

impl PartialEq for TaskPrediction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TaskPrediction {}

impl Hash for TaskPrediction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
