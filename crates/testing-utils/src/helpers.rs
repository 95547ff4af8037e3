//! Test helper utilities and common testing patterns

use balancer_core::{ResourceVector, TaskPrediction, WorkerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Poll `condition` every 10ms until it holds or `timeout` elapses.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        false
    }

    /// Set up logging for tests (call once per test binary)
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }
}

/// Assertion helpers for scheduling outcomes
pub struct TestAssertions;

impl TestAssertions {
    /// Assert that at no instant the predictions placed on a worker demand
    /// more than that worker's capacity.
    ///
    /// Every prediction must have a known duration. Intervals are half-open,
    /// so a task ending at `t` and one starting at `t` never overlap.
    pub fn assert_resource_safe(
        predictions: &[&TaskPrediction],
        capacities: &HashMap<WorkerId, ResourceVector>,
    ) {
        for prediction in predictions {
            let start = prediction.start_time;
            let capacity = capacities
                .get(&prediction.worker)
                .unwrap_or_else(|| panic!("no capacity for {}", prediction.worker));

            let demand = predictions
                .iter()
                .filter(|other| other.worker == prediction.worker)
                .filter(|other| {
                    let end = other.end_time().expect("known duration");
                    other.start_time <= start && start < end
                })
                .fold(ResourceVector::zeros(capacity.len()), |acc, other| {
                    acc.add(&other.resources)
                });

            assert!(
                demand.fits_within(capacity),
                "{} is over-committed at {}: demand {} exceeds capacity {}",
                prediction.worker,
                start,
                demand,
                capacity
            );
        }
    }
}
