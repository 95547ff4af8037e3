pub mod predictor;
pub mod resource_query;
pub mod sandbox;
pub mod scheduler;
pub mod task_executor;

pub use predictor::*;
pub use resource_query::*;
pub use sandbox::*;
pub use scheduler::*;
pub use task_executor::*;
