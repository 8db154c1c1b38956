//! Telemetry and logging infrastructure
//!
//! Logging setup on top of the `log` facade and frame rate measurement.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig};
pub use metrics::FpsCounter;
