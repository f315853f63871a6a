//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use diagnostics_core::config::ReporterConfiguration;
use diagnostics_core::error::ConfigurationError;
use diagnostics_core::measurement::{Measurement, TimeUnit};
use diagnostics_core::reporters::{Reporter, ReporterRegistry};
use parking_lot::Mutex;

/// Reporter that keeps every measurement it receives.
pub struct CaptureReporter {
    kind: String,
    seen: Arc<Mutex<Vec<Measurement>>>,
}

impl CaptureReporter {
    pub fn new(kind: &str) -> (Arc<Self>, Arc<Mutex<Vec<Measurement>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Arc::new(Self { kind: kind.to_string(), seen: seen.clone() }), seen)
    }
}

impl Reporter for CaptureReporter {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn report(&self, measurement: &Measurement) {
        self.seen.lock().push(measurement.clone());
    }
}

/// Reporter that panics on every call.
pub struct PanickingReporter;

impl Reporter for PanickingReporter {
    fn kind(&self) -> &str {
        "panicking"
    }

    fn report(&self, _measurement: &Measurement) {
        panic!("reporter failure");
    }

    fn stop(&self) {
        panic!("stop failure");
    }
}

/// Built-in registry plus a `capture` kind feeding `sink`.
pub fn registry_with_capture(sink: Arc<Mutex<Vec<Measurement>>>) -> ReporterRegistry {
    let mut registry = ReporterRegistry::builtin();
    registry.register("capture", move |config: &ReporterConfiguration, _env| {
        Ok(Arc::new(CaptureReporter { kind: config.kind.clone(), seen: sink.clone() })
            as Arc<dyn Reporter>)
    });
    registry.register("broken", |_config, _env| {
        Err(ConfigurationError::MissingOption("everything"))
    });
    registry
}

pub fn simple(name: &str, value: f64) -> Measurement {
    Measurement::simple(name, Some(value), 1_000, TimeUnit::Milliseconds, HashMap::new(), HashMap::new())
        .unwrap()
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
