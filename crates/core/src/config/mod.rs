//! Balancer configuration.
//!
//! Loaded once at startup from a TOML file plus `BALANCER__`-prefixed
//! environment overrides, validated, and then treated as immutable for the
//! lifetime of the dispatcher or worker node built from it.
//!
//! ```toml
//! [dispatcher]
//! scheduler = "timeline"
//! dimensions = 2
//!
//! [[workers]]
//! address = "10.0.0.5:42043"
//! credential = "s3cret"
//! monitoring_port = 42042
//! ```

pub mod models;

pub use models::*;
