//! Module layer: turns query events and timer ticks into measurements.
//!
//! Modules never talk to reporters. Event-driven modules return measurements
//! from [`Module::transform`]; timer-driven modules publish through the
//! [`Emitter`] they receive in [`Module::start`], which feeds the same
//! reporter fan-out the dispatcher uses for events.

mod decider;
mod heartbeat;
mod registry;
mod request_rate;
mod slow_query;

use std::any::Any;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::config::GlobalConfiguration;
use crate::error::ConfigurationError;
use crate::event::QueryEvent;
use crate::measurement::{Measurement, TimeUnit};
use crate::scheduler::SchedulerHandle;

pub use decider::{SlowQueryDecider, TableSelector};
pub use heartbeat::HeartbeatModule;
pub use registry::{ModuleFactory, ModuleRegistry};
pub use request_rate::RequestRateModule;
pub use slow_query::SlowQueryModule;

/// A unit that decides whether and how events become measurements.
pub trait Module: Send + Sync + 'static {
    /// Configured kind of this module.
    fn name(&self) -> &str;

    /// Measurements derived from one query event. Empty when not interested.
    fn transform(&self, _event: &QueryEvent) -> Vec<Measurement> {
        Vec::new()
    }

    /// Begin timer-driven work. Called once the module is live.
    fn start(&self, _runtime: &ModuleRuntime) {}

    /// Stop timer-driven work. Safe to call multiple times.
    fn stop(&self) {}

    /// Downcast hook for management operations on concrete modules.
    fn as_any(&self) -> &dyn Any;
}

/// Construction-time context shared by all modules.
#[derive(Debug, Clone)]
pub struct ModuleEnv {
    pub global: Arc<GlobalConfiguration>,
}

impl ModuleEnv {
    pub fn new(global: Arc<GlobalConfiguration>) -> Self {
        Self { global }
    }

    /// Tags every module attaches: `host` and `systemName`.
    pub fn base_tags(&self) -> HashMap<String, String> {
        HashMap::from([
            ("host".to_string(), self.global.hostname.clone()),
            ("systemName".to_string(), self.global.system_name.clone()),
        ])
    }
}

/// Publishes measurements produced outside of `transform` (timer ticks).
#[derive(Clone)]
pub struct Emitter {
    publish: Arc<dyn Fn(Measurement) + Send + Sync>,
}

impl Emitter {
    pub fn new(publish: impl Fn(Measurement) + Send + Sync + 'static) -> Self {
        Self { publish: Arc::new(publish) }
    }

    pub fn emit(&self, measurement: Measurement) {
        (self.publish)(measurement)
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

/// Runtime services handed to a module when it goes live.
#[derive(Clone)]
pub struct ModuleRuntime {
    pub scheduler: SchedulerHandle,
    pub emitter: Emitter,
}

const DEFAULT_PERIOD: u64 = 15;
const DEFAULT_TIME_UNIT: &str = "MINUTES";

/// `period` + `timeunit` options shared by timer-driven modules.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PeriodOptions {
    period: u64,
    #[serde(alias = "timeUnit")]
    timeunit: String,
}

impl Default for PeriodOptions {
    fn default() -> Self {
        Self { period: DEFAULT_PERIOD, timeunit: DEFAULT_TIME_UNIT.to_string() }
    }
}

impl PeriodOptions {
    /// Validate into a tick period.
    fn into_duration(self) -> Result<Duration, ConfigurationError> {
        if self.period == 0 {
            return Err(ConfigurationError::InvalidOption {
                option: "period",
                reason: "must be greater than zero".to_string(),
            });
        }
        let unit = TimeUnit::from_str(&self.timeunit)
            .map_err(|reason| ConfigurationError::InvalidOption { option: "timeunit", reason })?;
        Ok(unit.duration(self.period))
    }
}

/// Current wall-clock time in epoch milliseconds.
fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_defaults_to_fifteen_minutes() {
        let d = PeriodOptions::default().into_duration().unwrap();
        assert_eq!(d, Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_period_rejects_bad_unit_and_zero() {
        let bad_unit = PeriodOptions { period: 1, timeunit: "WEEKS".to_string() };
        assert!(matches!(
            bad_unit.into_duration(),
            Err(ConfigurationError::InvalidOption { option: "timeunit", .. })
        ));
        let zero = PeriodOptions { period: 0, timeunit: "SECONDS".to_string() };
        assert!(matches!(
            zero.into_duration(),
            Err(ConfigurationError::InvalidOption { option: "period", .. })
        ));
    }

    #[test]
    fn test_base_tags() {
        let global = GlobalConfiguration {
            hostname: "h1".to_string(),
            system_name: "s1".to_string(),
            http_api_enabled: false,
            http_api_port: 1,
        };
        let tags = ModuleEnv::new(Arc::new(global)).base_tags();
        assert_eq!(tags["host"], "h1");
        assert_eq!(tags["systemName"], "s1");
    }
}
