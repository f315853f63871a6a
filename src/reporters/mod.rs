//! Reporter layer: delivers measurements to external telemetry sinks.
//!
//! # Architecture
//!
//! - [`Reporter`]: one sink. `report` is best-effort and never fails past its
//!   own boundary; a reporter missing required options stays disabled.
//! - [`ReporterRegistry`]: kind → constructor mapping.
//! - [`ReporterContext`]: ordered, failure-isolated fan-out to every reporter.
//!
//! Built-in kinds:
//!
//! | Kind | Sink | Delivery |
//! |---|---|---|
//! | `log` | tracing events | synchronous |
//! | `influxdb` | time-series database | bounded queue, batched background flush |
//! | `datadog` | metrics daemon (UDP) | fire-and-forget datagram |
//! | `kafka` | message bus | non-blocking enqueue, keyed by host |
//! | `riemann` | monitoring events | bounded ack wait, one retry |

mod context;
mod datadog;
mod influx;
mod kafka;
pub mod line;
mod log;
mod registry;
mod resolve;
pub mod riemann;

use std::sync::Arc;

use crate::config::GlobalConfiguration;
use crate::measurement::Measurement;
use crate::scheduler::SchedulerHandle;

pub use context::ReporterContext;
pub use datadog::DatadogReporter;
pub use influx::InfluxReporter;
pub use kafka::{KafkaReporter, PayloadFormat};
pub use log::LogReporter;
pub use registry::{ReporterFactory, ReporterRegistry};
pub use riemann::RiemannReporter;

/// Delivers measurements to one sink.
pub trait Reporter: Send + Sync + 'static {
    /// Configured kind of this reporter.
    fn kind(&self) -> &str;

    /// Deliver one measurement. Failures are logged here, never returned.
    fn report(&self, measurement: &Measurement);

    /// Release the sink connection. Idempotent; later reports are no-ops.
    fn stop(&self) {}
}

/// Construction-time context shared by all reporters.
#[derive(Clone)]
pub struct ReporterEnv {
    pub global: Arc<GlobalConfiguration>,
    pub scheduler: SchedulerHandle,
}

impl ReporterEnv {
    pub fn new(global: Arc<GlobalConfiguration>, scheduler: SchedulerHandle) -> Self {
        Self { global, scheduler }
    }
}

/// Log that a reporter is disabled because `option` is missing.
fn warn_disabled(kind: &str, option: &str) {
    tracing::warn!(
        reporter = %kind,
        option = %option,
        "required option missing, reporter disabled"
    );
}
