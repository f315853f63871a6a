//! Request rate module.
//!
//! Counts every query event and, once per period, publishes the observed
//! requests per second as a simple measurement.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{now_millis, Module, ModuleEnv, ModuleRuntime, PeriodOptions};
use crate::config::{parse_options, ModuleConfiguration};
use crate::error::ConfigurationError;
use crate::event::QueryEvent;
use crate::measurement::{Measurement, TimeUnit};
use crate::scheduler::PeriodicTask;

const DEFAULT_NAMESPACE: &str = "request_rate";

pub struct RequestRateModule {
    name: String,
    namespace: String,
    period: Duration,
    base_tags: HashMap<String, String>,
    requests: Arc<AtomicU64>,
    task: Mutex<Option<PeriodicTask>>,
}

impl RequestRateModule {
    pub fn new(config: &ModuleConfiguration, env: &ModuleEnv) -> Result<Self, ConfigurationError> {
        let period = parse_options::<PeriodOptions>(&config.options)?.into_duration()?;
        Ok(Self {
            name: config.kind.clone(),
            namespace: config.namespace_or(DEFAULT_NAMESPACE),
            period,
            base_tags: env.base_tags(),
            requests: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        })
    }

    /// Requests counted since the last tick.
    pub fn pending_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Module for RequestRateModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, _event: &QueryEvent) -> Vec<Measurement> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        Vec::new()
    }

    fn start(&self, runtime: &ModuleRuntime) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let namespace = self.namespace.clone();
        let tags = self.base_tags.clone();
        let requests = self.requests.clone();
        let emitter = runtime.emitter.clone();
        let last_tick = Mutex::new(Instant::now());

        *task = Some(runtime.scheduler.every(&self.namespace, self.period, move || {
            let count = requests.swap(0, Ordering::Relaxed);
            let elapsed = {
                let mut last = last_tick.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(*last);
                *last = now;
                elapsed
            };
            let rate = count as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            let fields = HashMap::from([("count".to_string(), count.to_string())]);
            match Measurement::simple(
                namespace.clone(),
                Some(rate),
                now_millis(),
                TimeUnit::Milliseconds,
                tags.clone(),
                fields,
            ) {
                Ok(m) => emitter.emit(m),
                Err(e) => tracing::warn!(error = %e, "failed to build request rate measurement"),
            }
        }));
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfiguration;
    use crate::modules::Emitter;
    use crate::scheduler::Scheduler;

    #[test]
    fn test_counts_events_and_reports_rate() {
        let env = ModuleEnv::new(Arc::new(GlobalConfiguration::default()));
        let config = ModuleConfiguration::new("request_rate")
            .with_option("period", 100)
            .with_option("timeunit", "MILLISECONDS");
        let module = RequestRateModule::new(&config, &env).unwrap();

        let event = QueryEvent::new(1, "c", "s", "ks", "t");
        for _ in 0..10 {
            assert!(module.transform(&event).is_empty());
        }
        assert_eq!(module.pending_count(), 10);

        let scheduler = Scheduler::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        module.start(&ModuleRuntime {
            scheduler: scheduler.handle(),
            emitter: Emitter::new(move |m| sink.lock().push(m)),
        });
        std::thread::sleep(Duration::from_millis(170));
        module.stop();

        let seen = seen.lock();
        assert!(!seen.is_empty());
        let first = &seen[0];
        assert_eq!(first.name(), "request_rate");
        assert_eq!(first.fields()["count"], "10");
        assert!(first.value().unwrap() > 0.0);
        assert_eq!(module.pending_count(), 0);
    }
}
