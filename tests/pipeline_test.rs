//! End-to-end: query events through the dispatcher into reporters.

mod common;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use common::{registry_with_capture, wait_for};
use diagnostics_core::config::{
    Configuration, GlobalConfiguration, ModuleConfiguration, ReporterConfiguration,
};
use diagnostics_core::event::QueryEvent;
use diagnostics_core::measurement::Measurement;
use diagnostics_core::modules::{Module, ModuleRegistry, SlowQueryModule};
use diagnostics_core::Dispatcher;
use parking_lot::Mutex;

fn global() -> GlobalConfiguration {
    GlobalConfiguration {
        hostname: "node1".to_string(),
        system_name: "cassandra".to_string(),
        http_api_enabled: false,
        http_api_port: 8998,
    }
}

fn slow_query_config() -> Configuration {
    Configuration {
        global: global(),
        reporters: vec![ReporterConfiguration::new("log"), ReporterConfiguration::new("capture")],
        modules: vec![ModuleConfiguration::new("slow_query")
            .with_namespace("slow_query_measurement")
            .with_option("slowQueryThresholdInMilliseconds", 25)
            .with_option("tablesForLogging", serde_json::json!(["ks.users"]))],
    }
}

fn dispatcher(config: Configuration, seen: &Arc<Mutex<Vec<Measurement>>>) -> Dispatcher {
    Dispatcher::with_registries(config, ModuleRegistry::builtin(), registry_with_capture(seen.clone()))
        .unwrap()
}

fn event(millis: u64, table: &str) -> QueryEvent {
    QueryEvent::new(millis * 1_000, "10.0.0.7", "SELECT * FROM ks.users", "ks", table)
        .with_timestamp(1_700_000_000_000)
}

#[test]
fn fast_query_produces_nothing() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = dispatcher(slow_query_config(), &seen);

    dispatcher.report(&event(20, "users"));

    assert!(seen.lock().is_empty());
}

#[test]
fn slow_query_on_listed_table_is_reported_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = dispatcher(slow_query_config(), &seen);
    assert_eq!(dispatcher.reporter_count(), 2);

    dispatcher.report(&event(30, "users"));

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    let m = &seen[0];
    assert_eq!(m.name(), "slow_query_measurement");
    assert_eq!(m.value().unwrap(), 30.0);
    assert_eq!(m.time(), 1_700_000_000_000);
    assert_eq!(m.tags()["host"], "node1");
    assert_eq!(m.tags()["systemName"], "cassandra");
    assert_eq!(m.tags()["keyspace"], "ks");
    assert_eq!(m.tags()["table"], "users");
    assert_eq!(m.fields()["client"], "10.0.0.7");
}

#[test]
fn threshold_is_inclusive() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = dispatcher(slow_query_config(), &seen);

    dispatcher.report(&event(25, "users"));

    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn slow_query_on_unlisted_table_is_ignored() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = dispatcher(slow_query_config(), &seen);

    dispatcher.report(&event(30, "orders"));

    assert!(seen.lock().is_empty());
}

#[test]
fn threshold_tuned_at_runtime() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = dispatcher(slow_query_config(), &seen);

    dispatcher
        .with_module(|m: &SlowQueryModule| m.decider().set_threshold_millis(10))
        .unwrap();
    dispatcher.report(&event(20, "users"));

    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn routed_module_skips_other_reporters() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut config = slow_query_config();
    config.modules[0] = config.modules[0].clone().with_reporters(&["log"]);
    let dispatcher = dispatcher(config, &seen);

    dispatcher.report(&event(30, "users"));

    assert!(seen.lock().is_empty());
}

#[test]
fn heartbeat_ticks_reach_reporters() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let config = Configuration {
        global: global(),
        reporters: vec![ReporterConfiguration::new("capture")],
        modules: vec![ModuleConfiguration::new("heartbeat")
            .with_option("period", 20)
            .with_option("timeunit", "MILLISECONDS")],
    };
    let dispatcher = dispatcher(config, &seen);

    assert!(wait_for(Duration::from_secs(2), || seen.lock().len() >= 2));
    {
        let seen = seen.lock();
        assert!(seen.iter().all(|m| m.name() == "heartbeat" && m.is_complex()));
        assert_eq!(seen[0].tags()["host"], "node1");
    }

    dispatcher.shutdown();
    let after_shutdown = seen.lock().len();
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(seen.lock().len(), after_shutdown);
}

struct PanickingModule;

impl Module for PanickingModule {
    fn name(&self) -> &str {
        "panicking"
    }

    fn transform(&self, _event: &QueryEvent) -> Vec<Measurement> {
        panic!("module failure");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn panicking_module_does_not_block_others() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut modules = ModuleRegistry::builtin();
    modules.register("panicking", |_config, _env| Ok(Arc::new(PanickingModule) as Arc<dyn Module>));
    let mut config = slow_query_config();
    config.modules.insert(0, ModuleConfiguration::new("panicking"));
    let dispatcher =
        Dispatcher::with_registries(config, modules, registry_with_capture(seen.clone())).unwrap();

    dispatcher.report(&event(30, "users"));

    assert_eq!(dispatcher.module_count(), 2);
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn configuration_loads_from_toml() {
    let config = Configuration::from_toml_str(
        r#"
        [global]
        hostname = "node9"
        systemName = "cassandra"

        [[reporters]]
        kind = "log"

        [[modules]]
        kind = "slow_query"
        measurementNamespace = "sq"
        [modules.options]
        slowQueryThresholdInMilliseconds = 5
        tablesForLogging = ["ks.*"]
        "#,
    )
    .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut config = config;
    config.reporters.push(ReporterConfiguration::new("capture"));
    let dispatcher = dispatcher(config, &seen);

    dispatcher.report(&event(6, "anything"));

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].name(), "sq");
    assert_eq!(seen[0].tags()["host"], "node9");
}

#[tokio::test]
async fn dispatcher_dropped_inside_async_context() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let config = Configuration {
        global: global(),
        reporters: vec![ReporterConfiguration::new("capture")],
        modules: vec![ModuleConfiguration::new("heartbeat")
            .with_option("period", 10)
            .with_option("timeunit", "MILLISECONDS")],
    };
    let dispatcher = dispatcher(config, &seen);
    dispatcher.report(&event(30, "users"));
    drop(dispatcher);
}
