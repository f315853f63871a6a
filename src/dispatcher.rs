//! Event dispatcher and live pipeline management.
//!
//! The dispatcher holds the live [`Pipeline`] (modules plus reporter context)
//! behind a copy-on-write pointer. `report` takes a snapshot of the pointer,
//! so a concurrent `reload` never exposes a partially built set: a call sees
//! either the old pipeline or the new one, in full. Reload builds the new
//! pipeline off to the side, swaps it in, starts its timers, waits for calls
//! still holding the old snapshot to finish, and only then stops the old one.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::config::{Configuration, GlobalConfiguration};
use crate::error::StartupError;
use crate::event::QueryEvent;
use crate::measurement::Measurement;
use crate::modules::{Emitter, Module, ModuleEnv, ModuleRegistry, ModuleRuntime};
use crate::reporters::{ReporterContext, ReporterEnv, ReporterRegistry};
use crate::scheduler::Scheduler;
use crate::telemetry;

/// Upper bound on waiting for in-flight calls before stopping an old pipeline.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL: Duration = Duration::from_millis(1);

struct LiveModule {
    module: Arc<dyn Module>,
    /// Reporter kinds this module feeds; `None` means all.
    routes: Option<Vec<String>>,
}

/// One fully constructed generation of modules and reporters.
pub struct Pipeline {
    global: Arc<GlobalConfiguration>,
    modules: Vec<LiveModule>,
    reporters: ReporterContext,
}

impl Pipeline {
    fn empty() -> Self {
        Self {
            global: Arc::new(GlobalConfiguration::default()),
            modules: Vec::new(),
            reporters: ReporterContext::default(),
        }
    }

    pub fn global(&self) -> &GlobalConfiguration {
        &self.global
    }

    pub fn reporters(&self) -> &ReporterContext {
        &self.reporters
    }

    fn publish(&self, module: &LiveModule, measurement: &Measurement) {
        telemetry::record_measurement(module.module.name());
        self.reporters.report_to(measurement, module.routes.as_deref());
    }

    fn stop(&self) {
        for live in &self.modules {
            if catch_unwind(AssertUnwindSafe(|| live.module.stop())).is_err() {
                tracing::error!(module = %live.module.name(), "module panicked while stopping");
            }
        }
        self.reporters.stop();
    }
}

struct Shared {
    live: ArcSwap<Pipeline>,
}

/// Entry point for intercepted events and reconfiguration.
pub struct Dispatcher {
    shared: Arc<Shared>,
    scheduler: Scheduler,
    module_registry: ModuleRegistry,
    reporter_registry: ReporterRegistry,
    reload_lock: Mutex<()>,
    shut_down: AtomicBool,
}

impl Dispatcher {
    /// Build a dispatcher with the built-in module and reporter kinds.
    pub fn new(config: Configuration) -> Result<Self, StartupError> {
        Self::with_registries(config, ModuleRegistry::builtin(), ReporterRegistry::builtin())
    }

    pub fn with_registries(
        config: Configuration,
        module_registry: ModuleRegistry,
        reporter_registry: ReporterRegistry,
    ) -> Result<Self, StartupError> {
        let dispatcher = Self {
            shared: Arc::new(Shared { live: ArcSwap::from_pointee(Pipeline::empty()) }),
            scheduler: Scheduler::new()?,
            module_registry,
            reporter_registry,
            reload_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        };
        dispatcher.install(config);
        Ok(dispatcher)
    }

    /// Route one intercepted event through every live module.
    ///
    /// Never fails and never panics past this call.
    pub fn report(&self, event: &QueryEvent) {
        let pipeline = self.shared.live.load_full();
        for live in &pipeline.modules {
            match catch_unwind(AssertUnwindSafe(|| live.module.transform(event))) {
                Ok(measurements) => {
                    for measurement in &measurements {
                        pipeline.publish(live, measurement);
                    }
                }
                Err(_) => {
                    tracing::error!(module = %live.module.name(), "module panicked while transforming event");
                }
            }
        }
    }

    /// Replace the live modules and reporters with ones built from `config`.
    pub fn reload(&self, config: Configuration) {
        if self.install(config) {
            telemetry::record_reload();
        } else {
            tracing::warn!("reload ignored, dispatcher is shut down");
        }
    }

    /// Build, swap in, and start a new pipeline. `false` after shutdown.
    fn install(&self, config: Configuration) -> bool {
        let _guard = self.reload_lock.lock();
        if self.shut_down.load(Ordering::Acquire) {
            return false;
        }
        let pipeline = Arc::new(self.build(config));
        let old = self.shared.live.swap(pipeline.clone());
        self.start_modules(&pipeline);
        retire(old);
        tracing::info!(
            modules = pipeline.modules.len(),
            reporters = pipeline.reporters.len(),
            "diagnostics pipeline installed"
        );
        true
    }

    fn build(&self, config: Configuration) -> Pipeline {
        let global = Arc::new(config.global);
        let module_env = ModuleEnv::new(global.clone());
        let reporter_env = ReporterEnv::new(global.clone(), self.scheduler.handle());

        let reporters = ReporterContext::build(&config.reporters, &self.reporter_registry, &reporter_env);

        let mut modules = Vec::with_capacity(config.modules.len());
        for module_config in &config.modules {
            let built = catch_unwind(AssertUnwindSafe(|| {
                self.module_registry.build(module_config, &module_env)
            }));
            match built {
                Ok(Ok(module)) => {
                    tracing::info!(module = %module_config.kind, "module initialized");
                    modules.push(LiveModule { module, routes: module_config.reporters.clone() });
                }
                Ok(Err(e)) => {
                    telemetry::record_module_init_failure(&module_config.kind);
                    tracing::error!(module = %module_config.kind, error = %e, "failed to initialize module");
                }
                Err(_) => {
                    telemetry::record_module_init_failure(&module_config.kind);
                    tracing::error!(module = %module_config.kind, "module constructor panicked");
                }
            }
        }

        Pipeline { global, modules, reporters }
    }

    /// Start timers of a freshly installed pipeline. Ticks are published to
    /// whatever pipeline is live when they fire.
    fn start_modules(&self, pipeline: &Pipeline) {
        for live in &pipeline.modules {
            let runtime = ModuleRuntime {
                scheduler: self.scheduler.handle(),
                emitter: emitter(
                    Arc::downgrade(&self.shared),
                    live.module.name().to_string(),
                    live.routes.clone(),
                ),
            };
            if catch_unwind(AssertUnwindSafe(|| live.module.start(&runtime))).is_err() {
                tracing::error!(module = %live.module.name(), "module panicked while starting");
            }
        }
    }

    /// Stop all modules and reporters and the scheduler. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let old = {
            let _guard = self.reload_lock.lock();
            self.shared.live.swap(Arc::new(Pipeline::empty()))
        };
        retire(old);
        self.scheduler.shutdown();
        tracing::info!("diagnostics pipeline shut down");
    }

    /// Snapshot of the live pipeline.
    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.shared.live.load_full()
    }

    /// Live module of the given kind.
    pub fn module(&self, kind: &str) -> Option<Arc<dyn Module>> {
        self.shared
            .live
            .load()
            .modules
            .iter()
            .find(|live| live.module.name() == kind)
            .map(|live| live.module.clone())
    }

    /// Run `f` against the first live module of concrete type `T`.
    pub fn with_module<T: Module, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let pipeline = self.shared.live.load_full();
        pipeline
            .modules
            .iter()
            .find_map(|live| live.module.as_any().downcast_ref::<T>())
            .map(f)
    }

    pub fn module_count(&self) -> usize {
        self.shared.live.load().modules.len()
    }

    pub fn reporter_count(&self) -> usize {
        self.shared.live.load().reporters.len()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Stop a swapped-out pipeline once no call holds a snapshot of it.
///
/// Every `report` and timer tick holds its snapshot `Arc` for the whole
/// fan-out, so the strong count is the in-flight count plus this reference.
fn retire(old: Arc<Pipeline>) {
    if !drain(&old, DRAIN_TIMEOUT) {
        tracing::warn!(
            in_flight = Arc::strong_count(&old) - 1,
            timeout = ?DRAIN_TIMEOUT,
            "drain timed out, stopping old pipeline with calls in flight"
        );
    }
    old.stop();
}

/// Wait until `old` is referenced only by the caller. `false` on timeout.
fn drain(old: &Arc<Pipeline>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if Arc::strong_count(old) == 1 {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(DRAIN_POLL);
    }
}

/// Timer output path for one module: the live pipeline's reporters, filtered
/// by the routes configured for that module.
fn emitter(shared: Weak<Shared>, module: String, routes: Option<Vec<String>>) -> Emitter {
    Emitter::new(move |measurement| {
        let Some(shared) = shared.upgrade() else { return };
        let pipeline = shared.live.load_full();
        telemetry::record_measurement(&module);
        pipeline.reporters.report_to(&measurement, routes.as_deref());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleConfiguration;
    use crate::modules::SlowQueryModule;

    #[test]
    fn test_empty_configuration_is_a_noop() {
        let dispatcher = Dispatcher::new(Configuration::default()).unwrap();
        assert_eq!(dispatcher.module_count(), 0);
        assert_eq!(dispatcher.reporter_count(), 0);
        dispatcher.report(&QueryEvent::new(1_000_000, "c", "s", "ks", "t"));
    }

    #[test]
    fn test_bad_module_does_not_block_others() {
        let config = Configuration {
            modules: vec![
                ModuleConfiguration::new("heartbeat").with_option("timeunit", "EONS"),
                ModuleConfiguration::new("unknown"),
                ModuleConfiguration::new("slow_query"),
            ],
            ..Configuration::default()
        };
        let dispatcher = Dispatcher::new(config).unwrap();
        assert_eq!(dispatcher.module_count(), 1);
        assert!(dispatcher.module("slow_query").is_some());
        assert!(dispatcher.module("heartbeat").is_none());
    }

    #[test]
    fn test_with_module_tunes_threshold() {
        let config = Configuration {
            modules: vec![ModuleConfiguration::new("slow_query")],
            ..Configuration::default()
        };
        let dispatcher = Dispatcher::new(config).unwrap();
        dispatcher
            .with_module(|m: &SlowQueryModule| m.decider().set_threshold_millis(5))
            .unwrap();
        let threshold = dispatcher.with_module(|m: &SlowQueryModule| m.decider().threshold_millis());
        assert_eq!(threshold, Some(5));
    }

    #[test]
    fn test_drain_waits_for_snapshot_release() {
        let old = Arc::new(Pipeline::empty());
        let snapshot = old.clone();
        assert!(!drain(&old, Duration::from_millis(20)));

        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(snapshot);
        });
        assert!(drain(&old, Duration::from_secs(2)));
        release.join().unwrap();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_disables_reload() {
        let dispatcher = Dispatcher::new(Configuration::default()).unwrap();
        dispatcher.shutdown();
        dispatcher.shutdown();
        dispatcher.reload(Configuration {
            modules: vec![ModuleConfiguration::new("slow_query")],
            ..Configuration::default()
        });
        assert_eq!(dispatcher.module_count(), 0);
    }
}
