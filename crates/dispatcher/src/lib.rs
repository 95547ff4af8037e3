//! Prediction-driven dispatcher.
//!
//! A [`LoadBalancer`] turns task features into a predicted duration and
//! resource vector, asks a [`balancer_core::Scheduler`] for a worker and start
//! slot, and runs the task remotely once every task it was chained after has
//! finished.

pub mod handle;
pub mod isolation;
pub mod load_balancer;
pub mod metrics;
pub mod prediction;
pub mod strategies;

pub use handle::ScheduledHandle;
pub use isolation::SandboxBracket;
pub use load_balancer::{LoadBalancer, LoadBalancerBuilder};
pub use metrics::DispatchMetrics;
pub use prediction::{LinearPredictor, Prediction, PredictorChain};
pub use strategies::*;
