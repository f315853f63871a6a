//! Fan-out of measurements to every configured reporter.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{Reporter, ReporterEnv, ReporterRegistry};
use crate::config::ReporterConfiguration;
use crate::measurement::Measurement;
use crate::telemetry;

/// Ordered set of live reporters. Immutable once built; reload replaces the
/// whole context.
#[derive(Clone, Default)]
pub struct ReporterContext {
    reporters: Vec<Arc<dyn Reporter>>,
}

impl ReporterContext {
    /// Build every configured reporter, skipping (and logging) the ones that
    /// fail to construct.
    pub fn build(
        configs: &[ReporterConfiguration],
        registry: &ReporterRegistry,
        env: &ReporterEnv,
    ) -> Self {
        let mut reporters = Vec::with_capacity(configs.len());
        for config in configs {
            let built = catch_unwind(AssertUnwindSafe(|| registry.build(config, env)));
            match built {
                Ok(Ok(reporter)) => {
                    tracing::info!(reporter = %config.kind, "reporter initialized");
                    reporters.push(reporter);
                }
                Ok(Err(e)) => {
                    telemetry::record_reporter_init_failure(&config.kind);
                    tracing::error!(reporter = %config.kind, error = %e, "failed to initialize reporter");
                }
                Err(_) => {
                    telemetry::record_reporter_init_failure(&config.kind);
                    tracing::error!(reporter = %config.kind, "reporter constructor panicked");
                }
            }
        }
        if reporters.is_empty() {
            tracing::warn!("no reporters configured, measurements will be discarded");
        }
        Self { reporters }
    }

    pub fn from_reporters(reporters: Vec<Arc<dyn Reporter>>) -> Self {
        Self { reporters }
    }

    /// Deliver to every reporter in configured order.
    pub fn report(&self, measurement: &Measurement) {
        for reporter in &self.reporters {
            deliver(reporter.as_ref(), measurement);
        }
    }

    /// Deliver only to reporters whose kind is listed; `None` means all.
    pub fn report_to(&self, measurement: &Measurement, kinds: Option<&[String]>) {
        match kinds {
            None => self.report(measurement),
            Some(kinds) => {
                for reporter in &self.reporters {
                    if kinds.iter().any(|k| k == reporter.kind()) {
                        deliver(reporter.as_ref(), measurement);
                    }
                }
            }
        }
    }

    /// Stop every reporter. Safe to call more than once.
    pub fn stop(&self) {
        for reporter in &self.reporters {
            if catch_unwind(AssertUnwindSafe(|| reporter.stop())).is_err() {
                tracing::error!(reporter = %reporter.kind(), "reporter panicked while stopping");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    /// Kinds of the live reporters, in order.
    pub fn kinds(&self) -> Vec<&str> {
        self.reporters.iter().map(|r| r.kind()).collect()
    }
}

/// One reporter call; a panicking reporter must not affect the others.
fn deliver(reporter: &dyn Reporter, measurement: &Measurement) {
    if catch_unwind(AssertUnwindSafe(|| reporter.report(measurement))).is_err() {
        telemetry::record_report_failure(reporter.kind());
        tracing::error!(reporter = %reporter.kind(), measurement = %measurement.name(),
            "reporter panicked, measurement dropped for this reporter");
    }
}
