pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use clock::*;
pub use config::{
    AppConfig, DispatcherConfig, LinearModelConfig, LogFormat, LoggingConfig, PredictorConfig,
    ResourceFormula, ResourceQueryConfig, SchedulerKind, WorkerEndpoint, WorkerNodeConfig,
};
pub use errors::*;
pub use models::*;
pub use traits::*;
