//! # Balancer Testing Utils
//!
//! In-memory test doubles shared by the workspace's test suites.
//!
//! - **Mocks**: fixed-capacity resource query, recording remote executor,
//!   recording sandbox provider
//! - **Builders**: worker endpoints and hand-made predictions
//! - **Helpers**: polling for asynchronous conditions
//!
//! ```toml
//! [dev-dependencies]
//! balancer-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use balancer_core::ManualClock;
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
