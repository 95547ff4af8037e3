use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocate the next identity. Identities increase monotonically.
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Address of a worker node, `host:port` of its execution endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(address: impl Into<String>) -> Self {
        WorkerId(address.into())
    }

    pub fn address(&self) -> &str {
        &self.0
    }

    /// Host part of the address, without the port.
    pub fn host(&self) -> &str {
        match self.0.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                host.trim_start_matches('[').trim_end_matches(']')
            }
            _ => &self.0,
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(address: &str) -> Self {
        WorkerId::new(address)
    }
}

/// Opaque unit of remote work.
///
/// The balancer never looks inside; worker nodes resolve `name` to a
/// registered handler and pass it the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RemoteTask {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Predicted run length in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskDuration {
    Known(u64),
    /// No prediction available. Only schedulable onto a single candidate worker.
    Unknown,
}

impl TaskDuration {
    /// Convert a raw predictor output. NaN and negative values become zero.
    pub fn from_prediction(nanos: f64) -> Self {
        if nanos.is_nan() || nanos <= 0.0 {
            TaskDuration::Known(0)
        } else if nanos >= u64::MAX as f64 {
            TaskDuration::Known(u64::MAX)
        } else {
            TaskDuration::Known(nanos as u64)
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TaskDuration::Unknown)
    }

    pub fn nanos(&self) -> Option<u64> {
        match self {
            TaskDuration::Known(n) => Some(*n),
            TaskDuration::Unknown => None,
        }
    }

    /// End instant of a task starting at `start`, `None` when unknown.
    pub fn end_from(&self, start: u64) -> Option<u64> {
        self.nanos().map(|d| start.saturating_add(d))
    }
}

impl fmt::Display for TaskDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskDuration::Known(n) => write!(f, "{n}ns"),
            TaskDuration::Unknown => f.write_str("unknown"),
        }
    }
}
