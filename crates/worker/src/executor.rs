use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use balancer_core::{RemoteExecutor, RemoteTask, SchedulerError, SchedulerResult, WorkerId};

use crate::protocol::{read_frame, write_frame, RemoteOutcome, DEFAULT_MAX_FRAME_BYTES};

/// Ships tasks to worker nodes over TCP, one connection per call.
#[derive(Debug, Clone)]
pub struct TcpRemoteExecutor {
    timeout: Duration,
    max_frame_bytes: usize,
}

impl TcpRemoteExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    async fn exchange(&self, worker: &WorkerId, task: &RemoteTask) -> SchedulerResult<RemoteOutcome> {
        let mut stream = TcpStream::connect(worker.address())
            .await
            .map_err(|e| SchedulerError::remote(worker, format!("connect: {e}")))?;
        stream.set_nodelay(true).ok();

        write_frame(&mut stream, task)
            .await
            .map_err(|e| SchedulerError::remote(worker, e))?;
        read_frame(&mut stream, self.max_frame_bytes)
            .await
            .map_err(|e| SchedulerError::remote(worker, e))
    }
}

#[async_trait]
impl RemoteExecutor for TcpRemoteExecutor {
    async fn execute(
        &self,
        worker: &WorkerId,
        task: &RemoteTask,
    ) -> SchedulerResult<serde_json::Value> {
        debug!(worker = %worker, task = %task.name, "sending task");

        let outcome = tokio::time::timeout(self.timeout, self.exchange(worker, task))
            .await
            .map_err(|_| {
                SchedulerError::remote(worker, format!("no answer within {:?}", self.timeout))
            })??;

        outcome.into_result()
    }

    fn name(&self) -> &str {
        "tcp"
    }
}
