//! Telemetry: structured logging and metric definitions.
//!
//! # Example
//!
//! ```rust,no_run
//! use snaplog_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::describe_metrics;
