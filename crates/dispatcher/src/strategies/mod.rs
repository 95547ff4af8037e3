//! Admission strategies implementing [`balancer_core::Scheduler`].
//!
//! - [`SimpleScheduler`] chains tasks per worker in FIFO order and never
//!   looks at resource vectors.
//! - [`TimelineScheduler`] simulates every worker's free-resource timeline
//!   and admits a task at the earliest instant it fits for its whole duration.

mod simple;
mod timeline;
mod timeline_scan;

pub use simple::SimpleScheduler;
pub use timeline::TimelineScheduler;
