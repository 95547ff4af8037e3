//! Data model of the balancer.
//!
//! - [`TaskPrediction`]: the immutable scheduling decision for one task.
//! - [`WorkerSnapshot`]: free resources of one worker at one instant.
//! - [`ResourceVector`]: fixed-dimension resource demands or capacities.
//! - [`ExecutionTimes`]: queue/start/finish stamps of a dispatched task.
//!
//! Predictions are keyed by [`TaskId`] everywhere. Two predictions with the
//! same worker, start time and resources are still different scheduling
//! entities, so equality and hashing only look at the identity.

pub mod execution_times;
pub mod resources;
pub mod task;
pub mod task_prediction;
pub mod worker;

pub use execution_times::*;
pub use resources::*;
pub use task::*;
pub use task_prediction::*;
pub use worker::*;
