use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Timing telemetry of one dispatched task.
#[derive(Debug, Clone)]
pub struct ExecutionTimes {
    pub queued_at: Instant,
    pub queued_at_utc: DateTime<Utc>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl ExecutionTimes {
    pub fn queued_now() -> Self {
        Self {
            queued_at: Instant::now(),
            queued_at_utc: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_started(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn mark_finished(&mut self) {
        self.finished_at = Some(Instant::now());
    }

    /// Time between submission and start.
    pub fn waited(&self) -> Option<Duration> {
        self.started_at.map(|s| s.saturating_duration_since(self.queued_at))
    }

    /// Time between start and finish.
    pub fn processed(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some(f.saturating_duration_since(s)),
            _ => None,
        }
    }

    /// Time between submission and finish.
    pub fn retained(&self) -> Option<Duration> {
        self.finished_at
            .map(|f| f.saturating_duration_since(self.queued_at))
    }
}

impl Default for ExecutionTimes {
    fn default() -> Self {
        Self::queued_now()
    }
}
