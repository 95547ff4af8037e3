use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use balancer_core::{ExecutionTimes, SchedulerError, SchedulerResult, TaskPrediction};

type Outcome = Option<SchedulerResult<serde_json::Value>>;

/// Worker-side half of a handle: records timing and publishes the outcome.
pub(crate) struct Completion {
    pub(crate) times: Arc<Mutex<ExecutionTimes>>,
    pub(crate) cancel: CancellationToken,
    sender: watch::Sender<Outcome>,
}

impl Completion {
    pub(crate) fn mark_started(&self) {
        self.times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .mark_started();
    }

    pub(crate) fn mark_finished(&self) -> ExecutionTimes {
        let mut times = self.times.lock().unwrap_or_else(|e| e.into_inner());
        times.mark_finished();
        times.clone()
    }

    pub(crate) fn complete(&self, outcome: SchedulerResult<serde_json::Value>) {
        self.sender.send_replace(Some(outcome));
    }
}

/// Caller-side view of one submitted task.
///
/// Cloning shares the same underlying task; every clone observes the same
/// outcome.
#[derive(Clone)]
pub struct ScheduledHandle {
    prediction: Arc<TaskPrediction>,
    times: Arc<Mutex<ExecutionTimes>>,
    cancel: CancellationToken,
    receiver: watch::Receiver<Outcome>,
}

impl ScheduledHandle {
    pub(crate) fn new(prediction: Arc<TaskPrediction>, times: ExecutionTimes) -> (Self, Completion) {
        let (sender, receiver) = watch::channel(None);
        let times = Arc::new(Mutex::new(times));
        let cancel = CancellationToken::new();

        let handle = Self {
            prediction,
            times: Arc::clone(&times),
            cancel: cancel.clone(),
            receiver,
        };
        let completion = Completion {
            times,
            cancel,
            sender,
        };
        (handle, completion)
    }

    pub fn prediction(&self) -> &Arc<TaskPrediction> {
        &self.prediction
    }

    /// Snapshot of the task's timing telemetry.
    pub fn execution_times(&self) -> ExecutionTimes {
        self.times.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_done(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Outcome if the task already finished.
    pub fn try_result(&self) -> Option<SchedulerResult<serde_json::Value>> {
        self.receiver.borrow().clone()
    }

    /// Wait for the outcome.
    pub async fn wait(&self) -> SchedulerResult<serde_json::Value> {
        let mut receiver = self.receiver.clone();
        let outcome = receiver.wait_for(Option::is_some).await;
        match outcome {
            Ok(value) => value
                .clone()
                .unwrap_or_else(|| Err(SchedulerError::Internal("empty task outcome".to_string()))),
            Err(_) => Err(SchedulerError::Internal(format!(
                "task {} was dropped before completing",
                self.prediction.id
            ))),
        }
    }

    /// Wait at most `timeout`; fails with `Timeout` if the task is still running.
    ///
    /// Timing out does not cancel the task.
    pub async fn wait_timeout(&self, timeout: Duration) -> SchedulerResult<serde_json::Value> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .unwrap_or(Err(SchedulerError::Timeout(self.prediction.id)))
    }

    /// Request cancellation.
    ///
    /// A task that has not started yet never reaches its worker. A running
    /// task is abandoned locally; the worker may still finish it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for ScheduledHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("task_id", &self.prediction.id)
            .field("worker", &self.prediction.worker)
            .field("done", &self.is_done())
            .finish()
    }
}
