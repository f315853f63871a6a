//! Observability of the diagnostics pipeline itself.
//!
//! Structured logging setup and self-health counters. Measurements about the
//! host database travel through reporters, not through this module.

mod counters;
mod logging;

pub use counters::{
    record_dropped, record_measurement, record_module_init_failure, record_reload,
    record_report, record_report_failure, record_reporter_init_failure,
};
pub use logging::{init_logging, LogConfig, LogError, LogFormat};
