//! Mock implementations of the dispatcher's collaborator traits
//!
//! Every mock records what it was asked to do so tests can assert on order
//! and concurrency without a real worker.

use async_trait::async_trait;
use balancer_core::{
    Clock, RemoteExecutor, RemoteTask, ResourceQuery, ResourceVector, Sandbox, SandboxPhase,
    SandboxProvider, SchedulerError, SchedulerResult, TaskPrediction, WorkerId, WorkerSnapshot,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared, ordered record of mock activity, e.g. `create:sort`, `run:sort`.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Position of the first occurrence of `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().unwrap().iter().position(|e| e == event)
    }
}

/// Resource query reporting a fixed free vector per worker.
#[derive(Clone)]
pub struct FixedResourceQuery {
    clock: Arc<dyn Clock>,
    capacities: Arc<Mutex<HashMap<WorkerId, ResourceVector>>>,
    failing: Arc<Mutex<HashSet<WorkerId>>>,
    queries: Arc<AtomicUsize>,
}

impl FixedResourceQuery {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            capacities: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_worker(self, worker: &str, free: Vec<f64>) -> Self {
        self.set_free(worker, free);
        self
    }

    pub fn set_free(&self, worker: &str, free: Vec<f64>) {
        self.capacities
            .lock()
            .unwrap()
            .insert(WorkerId::new(worker), ResourceVector::new(free));
    }

    pub fn fail_worker(&self, worker: &str) {
        self.failing.lock().unwrap().insert(WorkerId::new(worker));
    }

    pub fn recover_worker(&self, worker: &str) {
        self.failing.lock().unwrap().remove(&WorkerId::new(worker));
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceQuery for FixedResourceQuery {
    async fn query(&self, worker: &WorkerId) -> SchedulerResult<WorkerSnapshot> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(worker) {
            return Err(SchedulerError::resource_query(worker, "metrics endpoint unreachable"));
        }

        let free = self
            .capacities
            .lock()
            .unwrap()
            .get(worker)
            .cloned()
            .ok_or_else(|| SchedulerError::resource_query(worker, "unknown worker"))?;

        Ok(WorkerSnapshot::measured(self.clock.now(), worker.clone(), free))
    }
}

/// One call observed by [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorCall {
    pub worker: WorkerId,
    pub task: String,
}

/// Remote executor that answers locally after an optional per-task delay.
///
/// Successful calls return `{"task": name, "worker": address, "payload": payload}`.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    log: EventLog,
    calls: Arc<Mutex<Vec<ExecutorCall>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    failures: Arc<Mutex<HashSet<String>>>,
    panics: Arc<Mutex<HashSet<String>>>,
    running: Arc<Mutex<HashMap<WorkerId, usize>>>,
    max_running_per_worker: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `run:<task>` and `done:<task>` events into `log`.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_delay(self, task: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(task.to_string(), delay);
        self
    }

    pub fn failing(self, task: &str) -> Self {
        self.failures.lock().unwrap().insert(task.to_string());
        self
    }

    /// Panic instead of answering when `task` runs.
    pub fn panicking(self, task: &str) -> Self {
        self.panics.lock().unwrap().insert(task.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of simultaneous calls seen on any single worker.
    pub fn max_running_per_worker(&self) -> usize {
        self.max_running_per_worker.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls seen across all workers.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    fn enter(&self, worker: &WorkerId) {
        let mut running = self.running.lock().unwrap();
        let count = running.entry(worker.clone()).or_insert(0);
        *count += 1;
        self.max_running_per_worker.fetch_max(*count, Ordering::SeqCst);
        let total = running.values().sum();
        self.max_running.fetch_max(total, Ordering::SeqCst);
    }

    fn leave(&self, worker: &WorkerId) {
        if let Some(count) = self.running.lock().unwrap().get_mut(worker) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn execute(
        &self,
        worker: &WorkerId,
        task: &RemoteTask,
    ) -> SchedulerResult<serde_json::Value> {
        self.calls.lock().unwrap().push(ExecutorCall {
            worker: worker.clone(),
            task: task.name.clone(),
        });
        self.log.push(format!("run:{}", task.name));

        let panics = self.panics.lock().unwrap().contains(&task.name);
        if panics {
            panic!("{} blew up", task.name);
        }
        self.enter(worker);

        let delay = self.delays.lock().unwrap().get(&task.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.leave(worker);
        self.log.push(format!("done:{}", task.name));

        if self.failures.lock().unwrap().contains(&task.name) {
            return Err(SchedulerError::TaskExecution(format!(
                "{} raised an error",
                task.name
            )));
        }

        Ok(serde_json::json!({
            "task": task.name,
            "worker": worker.address(),
            "payload": task.payload,
        }))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Sandbox recording `<phase>:<task>` events.
pub struct RecordingSandbox {
    task: String,
    log: EventLog,
    failing: HashSet<SandboxPhase>,
    credentials: Arc<Mutex<Vec<String>>>,
}

impl RecordingSandbox {
    fn step(&self, phase: SandboxPhase, credential: &str) -> SchedulerResult<()> {
        self.credentials.lock().unwrap().push(credential.to_string());
        self.log.push(format!("{}:{}", phase, self.task));
        if self.failing.contains(&phase) {
            return Err(SchedulerError::sandbox(phase, "operation not permitted"));
        }
        Ok(())
    }
}

#[async_trait]
impl Sandbox for RecordingSandbox {
    async fn create(&self, credential: &str) -> SchedulerResult<()> {
        self.step(SandboxPhase::Create, credential)
    }

    async fn attach(&self, credential: &str) -> SchedulerResult<()> {
        self.step(SandboxPhase::Attach, credential)
    }

    async fn destroy(&self, credential: &str) -> SchedulerResult<()> {
        self.step(SandboxPhase::Destroy, credential)
    }
}

/// Provider handing out [`RecordingSandbox`]es that share one log.
#[derive(Clone, Default)]
pub struct RecordingSandboxProvider {
    log: EventLog,
    failing: Arc<Mutex<HashSet<SandboxPhase>>>,
    credentials: Arc<Mutex<Vec<String>>>,
    built: Arc<AtomicUsize>,
}

impl RecordingSandboxProvider {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn failing(self, phase: SandboxPhase) -> Self {
        self.failing.lock().unwrap().insert(phase);
        self
    }

    /// Credentials passed to every lifecycle call, in order.
    pub fn credentials(&self) -> Vec<String> {
        self.credentials.lock().unwrap().clone()
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

impl SandboxProvider for RecordingSandboxProvider {
    fn build(&self, prediction: &TaskPrediction) -> Option<Arc<dyn Sandbox>> {
        self.built.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(RecordingSandbox {
            task: prediction.task.name.clone(),
            log: self.log.clone(),
            failing: self.failing.lock().unwrap().clone(),
            credentials: Arc::clone(&self.credentials),
        }))
    }
}
