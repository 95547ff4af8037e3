pub mod app_config;
pub mod dispatcher_worker;
pub mod logging;
pub mod predictor;
pub mod resource_query;

pub use app_config::*;
pub use dispatcher_worker::*;
pub use logging::*;
pub use predictor::*;
pub use resource_query::*;
