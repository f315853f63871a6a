//! Heartbeat module: one complex measurement per configured period.

use std::any::Any;
use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use super::{now_millis, Module, ModuleEnv, ModuleRuntime, PeriodOptions};
use crate::config::{parse_options, ModuleConfiguration};
use crate::error::ConfigurationError;
use crate::measurement::{Measurement, TimeUnit};
use crate::scheduler::PeriodicTask;

const DEFAULT_NAMESPACE: &str = "heartbeat";

pub struct HeartbeatModule {
    name: String,
    namespace: String,
    period: Duration,
    base_tags: HashMap<String, String>,
    task: Mutex<Option<PeriodicTask>>,
}

impl HeartbeatModule {
    pub fn new(config: &ModuleConfiguration, env: &ModuleEnv) -> Result<Self, ConfigurationError> {
        let period = parse_options::<PeriodOptions>(&config.options)?.into_duration()?;
        Ok(Self {
            name: config.kind.clone(),
            namespace: config.namespace_or(DEFAULT_NAMESPACE),
            period,
            base_tags: env.base_tags(),
            task: Mutex::new(None),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Module for HeartbeatModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, runtime: &ModuleRuntime) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let namespace = self.namespace.clone();
        let tags = self.base_tags.clone();
        let emitter = runtime.emitter.clone();
        *task = Some(runtime.scheduler.every(&self.namespace, self.period, move || {
            emitter.emit(Measurement::complex(
                namespace.clone(),
                now_millis(),
                TimeUnit::Milliseconds,
                tags.clone(),
                HashMap::new(),
            ));
        }));
        tracing::info!(module = %self.name, period = ?self.period, "heartbeat started");
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel();
            tracing::info!(module = %self.name, "heartbeat stopped");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
