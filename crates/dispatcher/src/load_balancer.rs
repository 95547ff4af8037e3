use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use balancer_core::{
    AppConfig, Clock, ExecutionTimes, RemoteExecutor, RemoteTask, ResourceQuery, SandboxProvider,
    Scheduler, SchedulerError, SchedulerKind, SchedulerResult, TaskId, TaskPrediction,
    WorkerEndpoint, WorkerId,
};

use crate::handle::{Completion, ScheduledHandle};
use crate::isolation::SandboxBracket;
use crate::metrics::DispatchMetrics;
use crate::prediction::{unpredicted, PredictorChain};
use crate::strategies::{SimpleScheduler, TimelineScheduler};

/// A scheduled task waiting to be spawned.
struct WorkUnit {
    prediction: Arc<TaskPrediction>,
    completion: Completion,
    /// Stops the cancellation watcher of a parked unit once it leaves the queue.
    released: Option<DropGuard>,
}

/// State shared between the balancer and its running units of work.
struct Shared {
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<dyn RemoteExecutor>,
    sandbox: Option<Arc<dyn SandboxProvider>>,
    confine: bool,
    credentials: HashMap<WorkerId, String>,
    permits: Option<Arc<Semaphore>>,
    /// Successors waiting for each unfinished task, keyed by the task they follow.
    pending: Mutex<HashMap<TaskId, Vec<WorkUnit>>>,
    metrics: DispatchMetrics,
}

/// Dispatcher: predicts, schedules and runs remote tasks.
///
/// Tasks chained after an unfinished predecessor are parked until it
/// completes, so a worker never runs a task concurrently with the one it was
/// chained after.
pub struct LoadBalancer {
    shared: Arc<Shared>,
    predictor: Option<PredictorChain>,
    workers: Vec<WorkerId>,
}

impl fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("scheduler", &self.shared.scheduler.name())
            .field("executor", &self.shared.executor.name())
            .field("workers", &self.workers)
            .field("predictor", &self.predictor.is_some())
            .finish()
    }
}

impl LoadBalancer {
    pub fn builder(
        scheduler: Arc<dyn Scheduler>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> LoadBalancerBuilder {
        LoadBalancerBuilder {
            scheduler,
            executor,
            workers: Vec::new(),
            predictor: None,
            sandbox: None,
            max_in_flight: 0,
            metrics: None,
        }
    }

    /// Assemble a balancer from configuration.
    pub fn from_config(
        config: &AppConfig,
        executor: Arc<dyn RemoteExecutor>,
        resource_query: Arc<dyn ResourceQuery>,
        clock: Arc<dyn Clock>,
    ) -> SchedulerResult<Self> {
        let scheduler: Arc<dyn Scheduler> = match config.dispatcher.scheduler {
            SchedulerKind::Simple => Arc::new(SimpleScheduler::new(clock)),
            SchedulerKind::Timeline => Arc::new(TimelineScheduler::new(resource_query, clock)),
        };

        let mut builder = Self::builder(scheduler, executor)
            .workers(config.workers.clone())
            .max_in_flight(config.dispatcher.max_in_flight);

        if let Some(predictor) = &config.predictor {
            builder = builder.predictor(PredictorChain::from_config(
                predictor,
                config.dispatcher.dimensions,
            ));
        }

        builder.build()
    }

    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    pub fn scheduler_name(&self) -> &str {
        self.shared.scheduler.name()
    }

    /// Number of tasks submitted and not yet finished.
    pub async fn pending_chains(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Predict, schedule and dispatch `task`.
    ///
    /// Fails synchronously with `SchedulingFailure` when no worker can ever
    /// host the predicted resources. Every later failure is reported through
    /// the returned handle.
    pub async fn submit(
        &self,
        task: RemoteTask,
        features: &[f64],
    ) -> SchedulerResult<ScheduledHandle> {
        let times = ExecutionTimes::queued_now();
        let predicted = match &self.predictor {
            Some(chain) => chain.predict(features),
            None => unpredicted(),
        };

        // Unknown durations only schedule onto one worker.
        let candidates = if predicted.duration.is_unknown() {
            &self.workers[..1]
        } else {
            &self.workers[..]
        };

        self.shared.metrics.record_submitted();

        let mut pending = self.shared.pending.lock().await;
        let prediction = match self
            .shared
            .scheduler
            .schedule(
                Arc::new(task),
                predicted.duration,
                predicted.resources,
                candidates,
            )
            .await
        {
            Ok(prediction) => prediction,
            Err(e) => {
                self.shared.metrics.record_scheduling_failure();
                warn!(error = %e, scheduler = self.shared.scheduler.name(), "task rejected");
                return Err(e);
            }
        };

        let (handle, completion) = ScheduledHandle::new(Arc::clone(&prediction), times);
        pending.insert(prediction.id, Vec::new());

        let cancel = completion.cancel.clone();
        let mut unit = WorkUnit {
            prediction: Arc::clone(&prediction),
            completion,
            released: None,
        };
        let parked_behind = match prediction.predecessor {
            Some(predecessor) => pending.get_mut(&predecessor),
            None => None,
        };
        match parked_behind {
            Some(successors) => {
                debug!(
                    task_id = %prediction.id,
                    predecessor = ?prediction.predecessor,
                    "parking task behind its predecessor"
                );
                let released = CancellationToken::new();
                unit.released = Some(released.clone().drop_guard());
                successors.push(unit);
                watch_parked(
                    Arc::downgrade(&self.shared),
                    prediction.id,
                    cancel,
                    released,
                );
            }
            None => spawn_unit(Arc::clone(&self.shared), unit),
        }
        self.shared.metrics.set_pending_chains(pending.len());

        info!(
            task_id = %prediction.id,
            task = %prediction.task.name,
            worker = %prediction.worker,
            start_time = prediction.start_time,
            duration = %prediction.duration,
            resources = %prediction.resources,
            "task scheduled"
        );

        Ok(handle)
    }
}

/// Builder for [`LoadBalancer`].
pub struct LoadBalancerBuilder {
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<dyn RemoteExecutor>,
    workers: Vec<WorkerEndpoint>,
    predictor: Option<PredictorChain>,
    sandbox: Option<Arc<dyn SandboxProvider>>,
    max_in_flight: usize,
    metrics: Option<DispatchMetrics>,
}

impl LoadBalancerBuilder {
    pub fn workers(mut self, workers: Vec<WorkerEndpoint>) -> Self {
        self.workers = workers;
        self
    }

    pub fn worker(mut self, worker: WorkerEndpoint) -> Self {
        self.workers.push(worker);
        self
    }

    pub fn predictor(mut self, predictor: PredictorChain) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Confine predicted tasks with sandboxes from `provider`.
    pub fn sandbox(mut self, provider: Arc<dyn SandboxProvider>) -> Self {
        self.sandbox = Some(provider);
        self
    }

    /// Bound on concurrently running remote calls, 0 for unbounded.
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn metrics(mut self, metrics: DispatchMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> SchedulerResult<LoadBalancer> {
        if self.workers.is_empty() {
            return Err(SchedulerError::Configuration(
                "load balancer needs at least one worker".to_string(),
            ));
        }

        let workers: Vec<WorkerId> = self.workers.iter().map(WorkerEndpoint::worker_id).collect();
        let credentials = self
            .workers
            .iter()
            .map(|w| (w.worker_id(), w.credential.clone()))
            .collect();
        let permits = (self.max_in_flight > 0).then(|| Arc::new(Semaphore::new(self.max_in_flight)));

        info!(
            scheduler = self.scheduler.name(),
            executor = self.executor.name(),
            workers = workers.len(),
            predictor = self.predictor.is_some(),
            max_in_flight = self.max_in_flight,
            "load balancer ready"
        );

        Ok(LoadBalancer {
            shared: Arc::new(Shared {
                scheduler: self.scheduler,
                executor: self.executor,
                sandbox: self.sandbox,
                confine: self.predictor.is_some(),
                credentials,
                permits,
                pending: Mutex::new(HashMap::new()),
                metrics: self.metrics.unwrap_or_default(),
            }),
            predictor: self.predictor,
            workers,
        })
    }
}

fn spawn_unit(shared: Arc<Shared>, unit: WorkUnit) {
    tokio::spawn(run_unit(shared, unit));
}

/// Withdraw a parked unit as soon as its handle is cancelled instead of
/// waiting for its predecessor to finish.
fn watch_parked(
    shared: Weak<Shared>,
    id: TaskId,
    cancel: CancellationToken,
    released: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = released.cancelled() => {}
            _ = cancel.cancelled() => {
                if let Some(shared) = shared.upgrade() {
                    shared.withdraw(id).await;
                }
            }
        }
    });
}

async fn run_unit(shared: Arc<Shared>, unit: WorkUnit) {
    let WorkUnit {
        prediction,
        completion,
        released,
    } = unit;
    drop(released);

    let outcome = if completion.cancel.is_cancelled() {
        debug!(task_id = %prediction.id, "task cancelled before start");
        Err(SchedulerError::Cancelled(prediction.id))
    } else {
        AssertUnwindSafe(shared.execute(&prediction, &completion))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panicked(prediction.id, panic)))
    };

    shared.scheduler.finished(&prediction);
    shared.release(prediction.id).await;
    shared.conclude(&prediction, &completion, outcome);
}

fn panicked(id: TaskId, panic: Box<dyn Any + Send>) -> SchedulerError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    SchedulerError::Internal(format!("task {id} panicked: {message}"))
}

impl Shared {
    async fn execute(
        &self,
        prediction: &TaskPrediction,
        completion: &Completion,
    ) -> SchedulerResult<serde_json::Value> {
        let cancel = &completion.cancel;

        let _permit = match &self.permits {
            Some(permits) => tokio::select! {
                permit = Arc::clone(permits).acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            },
            None => None,
        };
        if cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled(prediction.id));
        }

        self.scheduler.started(prediction);
        completion.mark_started();
        debug!(task_id = %prediction.id, worker = %prediction.worker, "task started");

        let call = remote_call(self.executor.as_ref(), prediction, cancel);
        match self.bracket(prediction) {
            Some(bracket) => bracket.run(call).await,
            None => call.await,
        }
    }

    fn bracket(&self, prediction: &TaskPrediction) -> Option<SandboxBracket> {
        if !self.confine || prediction.resources.is_empty() {
            return None;
        }
        let sandbox = self.sandbox.as_ref()?.build(prediction)?;
        let credential = self
            .credentials
            .get(&prediction.worker)
            .cloned()
            .unwrap_or_default();
        Some(SandboxBracket::new(prediction.id, sandbox, credential))
    }

    /// Record the outcome and wake every handle waiting on it.
    fn conclude(
        &self,
        prediction: &TaskPrediction,
        completion: &Completion,
        outcome: SchedulerResult<serde_json::Value>,
    ) {
        let times = completion.mark_finished();
        self.metrics.record_finished(times.waited(), times.processed());

        match &outcome {
            Ok(_) => debug!(
                task_id = %prediction.id,
                worker = %prediction.worker,
                processed = ?times.processed(),
                "task finished"
            ),
            Err(SchedulerError::Cancelled(_)) => self.metrics.record_cancellation(),
            Err(e) => {
                self.metrics.record_failure();
                warn!(task_id = %prediction.id, worker = %prediction.worker, error = %e, "task failed");
            }
        }

        completion.complete(outcome);
    }

    /// Pull a cancelled unit out of its predecessor's queue and resolve it.
    ///
    /// Units chained after it move up behind the same predecessor. Does
    /// nothing when the unit already left the queue.
    async fn withdraw(&self, id: TaskId) {
        let mut pending = self.pending.lock().await;
        let Some((owner, unit)) = pending.iter_mut().find_map(|(owner, units)| {
            let index = units.iter().position(|u| u.prediction.id == id)?;
            Some((*owner, units.remove(index)))
        }) else {
            return;
        };

        // Under the lock so no new task chains onto the withdrawn one.
        self.scheduler.finished(&unit.prediction);
        let orphans = pending.remove(&id).unwrap_or_default();
        if let Some(units) = pending.get_mut(&owner) {
            units.extend(orphans);
        }
        self.metrics.set_pending_chains(pending.len());
        drop(pending);

        debug!(task_id = %id, predecessor = %owner, "task cancelled while parked");
        self.conclude(
            &unit.prediction,
            &unit.completion,
            Err(SchedulerError::Cancelled(id)),
        );
    }

    /// Drop `id` from the pending table and start everything chained after it.
    async fn release(self: &Arc<Self>, id: TaskId) {
        let mut pending = self.pending.lock().await;
        let successors = pending.remove(&id).unwrap_or_default();
        for unit in successors {
            spawn_unit(Arc::clone(self), unit);
        }
        self.metrics.set_pending_chains(pending.len());
    }
}

async fn remote_call(
    executor: &dyn RemoteExecutor,
    prediction: &TaskPrediction,
    cancel: &CancellationToken,
) -> SchedulerResult<serde_json::Value> {
    let call =
        AssertUnwindSafe(executor.execute(&prediction.worker, &prediction.task)).catch_unwind();
    tokio::select! {
        result = call => result.unwrap_or_else(|panic| Err(panicked(prediction.id, panic))),
        _ = cancel.cancelled() => {
            debug!(task_id = %prediction.id, "abandoning running task");
            Err(SchedulerError::Cancelled(prediction.id))
        }
    }
}
