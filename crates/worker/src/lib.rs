//! Worker side of the balancer: the TCP node that runs dispatched tasks,
//! the executor the dispatcher uses to reach it, and the host metrics that
//! feed the dispatcher's resource queries.

pub mod executor;
pub mod handlers;
pub mod metrics_parser;
pub mod monitor;
pub mod node;
pub mod protocol;
pub mod resource_query;

pub use executor::TcpRemoteExecutor;
pub use handlers::{EchoHandler, ShellHandler, ShellTaskParams, SleepHandler, TaskHandler, TaskHandlerRegistry};
pub use metrics_parser::{MetricSample, MetricSet};
pub use monitor::{install_exporter, HostMonitor, HostSample};
pub use node::WorkerNode;
pub use protocol::{RemoteOutcome, DEFAULT_MAX_FRAME_BYTES};
pub use resource_query::PrometheusResourceQuery;
