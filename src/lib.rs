//! Query diagnostics pipeline.
//!
//! Embeds in a database node's request path. Intercepted query events are
//! turned into measurements by configurable modules and fanned out to
//! configurable reporters (log, time-series database, metrics daemon, message
//! bus, monitoring events).
//!
//! # Guarantees
//!
//! - Reporting never fails the caller: errors and panics inside modules or
//!   reporters are logged and isolated.
//! - A reload swaps modules and reporters as one unit. Concurrent reports see
//!   either the old set or the new set, never a mix.
//! - Timer-driven modules run on a dedicated scheduler, never on the caller's
//!   thread.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod measurement;
pub mod modules;
pub mod reporters;
pub mod scheduler;
pub mod telemetry;

pub use config::{Configuration, GlobalConfiguration, ModuleConfiguration, ReporterConfiguration};
pub use dispatcher::{Dispatcher, Pipeline};
pub use error::{ConfigurationError, SinkError, StartupError};
pub use event::QueryEvent;
pub use measurement::{Measurement, MeasurementError, MeasurementKind, TimeUnit};
pub use modules::{Module, ModuleRegistry};
pub use reporters::{Reporter, ReporterContext, ReporterRegistry};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
