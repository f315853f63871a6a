//! Kind → constructor mapping for modules.

use std::collections::HashMap;
use std::sync::Arc;

use super::{HeartbeatModule, Module, ModuleEnv, RequestRateModule, SlowQueryModule};
use crate::config::ModuleConfiguration;
use crate::error::ConfigurationError;

/// Builds one module from its configuration.
pub type ModuleFactory = Arc<
    dyn Fn(&ModuleConfiguration, &ModuleEnv) -> Result<Arc<dyn Module>, ConfigurationError>
        + Send
        + Sync,
>;

/// Registry of module kinds, populated once at startup.
#[derive(Clone)]
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    /// Empty registry without built-in kinds.
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Registry with `slow_query`, `heartbeat` and `request_rate`.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("slow_query", |config, env| {
            Ok(Arc::new(SlowQueryModule::new(config, env)?) as Arc<dyn Module>)
        });
        registry.register("heartbeat", |config, env| {
            Ok(Arc::new(HeartbeatModule::new(config, env)?) as Arc<dyn Module>)
        });
        registry.register("request_rate", |config, env| {
            Ok(Arc::new(RequestRateModule::new(config, env)?) as Arc<dyn Module>)
        });
        registry
    }

    /// Register or replace a module kind.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ModuleConfiguration, &ModuleEnv) -> Result<Arc<dyn Module>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Construct the module for `config`.
    ///
    /// # Errors
    /// [`ConfigurationError::UnknownKind`] for unregistered kinds, or whatever
    /// the module's own option validation reports.
    pub fn build(
        &self,
        config: &ModuleConfiguration,
        env: &ModuleEnv,
    ) -> Result<Arc<dyn Module>, ConfigurationError> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| ConfigurationError::UnknownKind(config.kind.clone()))?;
        factory(config, env)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
