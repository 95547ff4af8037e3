use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use balancer_core::{
    Clock, RemoteTask, ResourceVector, Scheduler, SchedulerError, SchedulerResult, TaskDuration,
    TaskPrediction, WorkerId,
};

/// FIFO chaining per worker.
///
/// Guarantees that tasks on one worker never overlap in time. Resource
/// vectors are carried along but never used for admission.
pub struct SimpleScheduler {
    clock: Arc<dyn Clock>,
    last_task_per_worker: Mutex<HashMap<WorkerId, Arc<TaskPrediction>>>,
}

impl SimpleScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_task_per_worker: Mutex::new(HashMap::new()),
        }
    }

    /// Most recently scheduled, not yet finished task of `worker`.
    pub fn last_task(&self, worker: &WorkerId) -> Option<Arc<TaskPrediction>> {
        self.last_task_per_worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(worker)
            .cloned()
    }
}

#[async_trait]
impl Scheduler for SimpleScheduler {
    async fn schedule(
        &self,
        task: Arc<RemoteTask>,
        duration: TaskDuration,
        resources: ResourceVector,
        workers: &[WorkerId],
    ) -> SchedulerResult<Arc<TaskPrediction>> {
        if workers.is_empty() {
            return Err(SchedulerError::scheduling("no candidate workers"));
        }

        let mut last_task_per_worker = self
            .last_task_per_worker
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();

        let (worker, start_time, predecessor) = if duration.is_unknown() {
            if workers.len() != 1 {
                return Err(SchedulerError::scheduling(format!(
                    "cannot run without a duration prediction on {} workers",
                    workers.len()
                )));
            }
            let worker = &workers[0];
            let predecessor = last_task_per_worker.get(worker).map(|p| p.id);
            (worker.clone(), now, predecessor)
        } else if let Some(idle) = workers
            .iter()
            .find(|w| !last_task_per_worker.contains_key(*w))
        {
            (idle.clone(), now, None)
        } else {
            // Every worker has a chain; append to the one that frees up first.
            let (worker, last) = workers
                .iter()
                .filter_map(|w| last_task_per_worker.get(w).map(|last| (w, last)))
                .min_by_key(|(_, last)| last.end_time().unwrap_or(u64::MAX))
                .ok_or_else(|| SchedulerError::Internal("worker chain vanished".to_string()))?;
            let free_at = last.end_time().unwrap_or(u64::MAX);
            (worker.clone(), free_at.max(now), Some(last.id))
        };

        let prediction = Arc::new(TaskPrediction::new(
            task,
            start_time,
            duration,
            worker.clone(),
            resources,
            predecessor,
        ));
        last_task_per_worker.insert(worker, Arc::clone(&prediction));

        debug!(
            task_id = %prediction.id,
            worker = %prediction.worker,
            start_time = prediction.start_time,
            predecessor = ?prediction.predecessor,
            "simple scheduler chained task"
        );

        Ok(prediction)
    }

    fn finished(&self, prediction: &TaskPrediction) {
        let mut last_task_per_worker = self
            .last_task_per_worker
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // A newer task may already be chained behind this one.
        if last_task_per_worker
            .get(&prediction.worker)
            .is_some_and(|last| last.id == prediction.id)
        {
            last_task_per_worker.remove(&prediction.worker);
        }
    }

    fn name(&self) -> &str {
        "Simple"
    }
}
