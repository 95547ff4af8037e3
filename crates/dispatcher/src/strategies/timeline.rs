use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use balancer_core::{
    Clock, RemoteTask, ResourceQuery, ResourceVector, Scheduler, SchedulerError, SchedulerResult,
    TaskDuration, TaskId, TaskPrediction, WorkerId, WorkerSnapshot,
};

use super::timeline_scan::{find_slot, task_events, worker_timeline, ResourceEvent};

#[derive(Default)]
struct TimelineState {
    waiting: BTreeMap<TaskId, Arc<TaskPrediction>>,
    processed: BTreeMap<TaskId, Arc<TaskPrediction>>,
}

/// Resource-aware admission over predicted free-resource timelines.
///
/// Free resources are never stored. Each `schedule` call rebuilds every
/// candidate worker's timeline from a fresh snapshot plus the waiting and
/// started predictions, then takes the earliest slot where the request fits
/// for its whole predicted duration.
pub struct TimelineScheduler {
    resource_query: Arc<dyn ResourceQuery>,
    clock: Arc<dyn Clock>,
    state: Mutex<TimelineState>,
}

impl TimelineScheduler {
    pub fn new(resource_query: Arc<dyn ResourceQuery>, clock: Arc<dyn Clock>) -> Self {
        Self {
            resource_query,
            clock,
            state: Mutex::new(TimelineState::default()),
        }
    }

    pub fn waiting_count(&self) -> usize {
        self.lock_state().waiting.len()
    }

    pub fn processed_count(&self) -> usize {
        self.lock_state().processed.len()
    }

    /// Every prediction not yet finished, waiting ones first.
    pub fn in_flight(&self) -> Vec<Arc<TaskPrediction>> {
        let state = self.lock_state();
        state
            .waiting
            .values()
            .chain(state.processed.values())
            .cloned()
            .collect()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fresh snapshots in candidate order. Workers whose query fails are
    /// dropped for this round.
    async fn snapshots(&self, workers: &[WorkerId]) -> Vec<WorkerSnapshot> {
        let results = join_all(workers.iter().map(|w| self.resource_query.query(w))).await;

        workers
            .iter()
            .zip(results)
            .filter_map(|(worker, result)| match result {
                Ok(mut snapshot) => {
                    snapshot.worker = worker.clone();
                    snapshot.causing_task = None;
                    Some(snapshot)
                }
                Err(e) => {
                    warn!(worker = %worker, error = %e, "excluding worker from this scheduling round");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl Scheduler for TimelineScheduler {
    async fn schedule(
        &self,
        task: Arc<RemoteTask>,
        duration: TaskDuration,
        resources: ResourceVector,
        workers: &[WorkerId],
    ) -> SchedulerResult<Arc<TaskPrediction>> {
        if duration.is_unknown() && workers.len() != 1 {
            return Err(SchedulerError::scheduling(format!(
                "cannot run without a duration prediction on {} workers",
                workers.len()
            )));
        }

        let snapshots = self.snapshots(workers).await;
        if snapshots.is_empty() {
            return Err(SchedulerError::scheduling(
                "no candidate worker reported its resources",
            ));
        }

        let now = snapshots
            .iter()
            .map(|s| s.timestamp)
            .fold(self.clock.now(), u64::max);

        let mut state = self.lock_state();

        let index: HashMap<&WorkerId, usize> = snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| (&s.worker, i))
            .collect();
        let mut events: Vec<Vec<ResourceEvent>> = vec![Vec::new(); snapshots.len()];

        let committed = state
            .waiting
            .values()
            .map(|p| (p, false))
            .chain(state.processed.values().map(|p| (p, true)));
        for (prediction, started) in committed {
            if let Some(&i) = index.get(&prediction.worker) {
                events[i].extend(task_events(prediction, started, now));
            }
        }

        let timelines: Vec<Vec<WorkerSnapshot>> = snapshots
            .iter()
            .zip(events)
            .map(|(baseline, events)| worker_timeline(baseline, events))
            .collect();

        let slot = find_slot(&timelines, &resources, duration, now).ok_or_else(|| {
            SchedulerError::scheduling(format!(
                "{resources} does not fit on any of {} workers",
                timelines.len()
            ))
        })?;

        let worker = timelines[slot.at.worker][slot.at.entry].worker.clone();
        let prediction = Arc::new(TaskPrediction::new(
            task,
            slot.start,
            duration,
            worker,
            resources,
            slot.predecessor,
        ));
        state.waiting.insert(prediction.id, Arc::clone(&prediction));

        debug!(
            task_id = %prediction.id,
            worker = %prediction.worker,
            start_time = prediction.start_time,
            now,
            delay = prediction.start_time - now,
            predecessor = ?prediction.predecessor,
            "timeline scheduler admitted task"
        );

        Ok(prediction)
    }

    fn started(&self, prediction: &TaskPrediction) {
        let mut state = self.lock_state();
        if let Some(p) = state.waiting.remove(&prediction.id) {
            state.processed.insert(p.id, p);
        }
    }

    fn finished(&self, prediction: &TaskPrediction) {
        let mut state = self.lock_state();
        // A task cancelled before it started is still in waiting.
        if state.processed.remove(&prediction.id).is_none() {
            state.waiting.remove(&prediction.id);
        }
    }

    fn name(&self) -> &str {
        "Timeline"
    }
}
