//! Kind → constructor mapping for reporters.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    DatadogReporter, InfluxReporter, KafkaReporter, LogReporter, Reporter, ReporterEnv,
    RiemannReporter,
};
use crate::config::ReporterConfiguration;
use crate::error::ConfigurationError;

/// Builds one reporter from its configuration.
pub type ReporterFactory = Arc<
    dyn Fn(&ReporterConfiguration, &ReporterEnv) -> Result<Arc<dyn Reporter>, ConfigurationError>
        + Send
        + Sync,
>;

/// Registry of reporter kinds, populated once at startup.
#[derive(Clone)]
pub struct ReporterRegistry {
    factories: HashMap<String, ReporterFactory>,
}

impl ReporterRegistry {
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Registry with `log`, `influxdb`, `datadog`, `kafka` and `riemann`.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("log", |config, _env| {
            Ok(Arc::new(LogReporter::new(config)?) as Arc<dyn Reporter>)
        });
        registry.register("influxdb", |config, env| {
            Ok(Arc::new(InfluxReporter::new(config, env)?) as Arc<dyn Reporter>)
        });
        registry.register("datadog", |config, env| {
            Ok(Arc::new(DatadogReporter::new(config, env)?) as Arc<dyn Reporter>)
        });
        registry.register("kafka", |config, env| {
            Ok(Arc::new(KafkaReporter::new(config, env)?) as Arc<dyn Reporter>)
        });
        registry.register("riemann", |config, env| {
            Ok(Arc::new(RiemannReporter::new(config, env)?) as Arc<dyn Reporter>)
        });
        registry
    }

    /// Register or replace a reporter kind.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ReporterConfiguration, &ReporterEnv) -> Result<Arc<dyn Reporter>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Construct the reporter for `config`.
    pub fn build(
        &self,
        config: &ReporterConfiguration,
        env: &ReporterEnv,
    ) -> Result<Arc<dyn Reporter>, ConfigurationError> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| ConfigurationError::UnknownKind(config.kind.clone()))?;
        factory(config, env)
    }
}

impl Default for ReporterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
