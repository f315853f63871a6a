//! Slow query module.
//!
//! Reports queries whose execution time reaches a configurable threshold,
//! optionally restricted to an allow-list of tables.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::decider::{SlowQueryDecider, TableSelector};
use super::{Module, ModuleEnv};
use crate::config::{parse_options, ModuleConfiguration};
use crate::error::ConfigurationError;
use crate::event::QueryEvent;
use crate::measurement::{Measurement, TimeUnit};

const DEFAULT_NAMESPACE: &str = "slow_query";
const DEFAULT_THRESHOLD_MILLIS: u64 = 25;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SlowQueryOptions {
    slow_query_threshold_in_milliseconds: u64,
    tables_for_logging: Vec<String>,
}

impl Default for SlowQueryOptions {
    fn default() -> Self {
        Self {
            slow_query_threshold_in_milliseconds: DEFAULT_THRESHOLD_MILLIS,
            tables_for_logging: Vec::new(),
        }
    }
}

pub struct SlowQueryModule {
    name: String,
    namespace: String,
    decider: Arc<SlowQueryDecider>,
    base_tags: HashMap<String, String>,
}

impl SlowQueryModule {
    pub fn new(config: &ModuleConfiguration, env: &ModuleEnv) -> Result<Self, ConfigurationError> {
        let options: SlowQueryOptions = parse_options(&config.options)?;

        let mut selectors = Vec::with_capacity(options.tables_for_logging.len());
        for entry in &options.tables_for_logging {
            let selector = TableSelector::parse(entry).ok_or_else(|| {
                ConfigurationError::InvalidOption {
                    option: "tablesForLogging",
                    reason: format!("'{entry}' is not of the form keyspace.table"),
                }
            })?;
            selectors.push(selector);
        }

        let threshold_micros = options.slow_query_threshold_in_milliseconds.saturating_mul(1_000);
        tracing::info!(
            threshold_ms = options.slow_query_threshold_in_milliseconds,
            tables = selectors.len(),
            "slow query module configured"
        );

        Ok(Self {
            name: config.kind.clone(),
            namespace: config.namespace_or(DEFAULT_NAMESPACE),
            decider: Arc::new(SlowQueryDecider::new(threshold_micros, selectors)),
            base_tags: env.base_tags(),
        })
    }

    /// Shared decider, exposed for live threshold tuning.
    pub fn decider(&self) -> Arc<SlowQueryDecider> {
        self.decider.clone()
    }

    fn measurement(&self, event: &QueryEvent) -> Option<Measurement> {
        let mut tags = self.base_tags.clone();
        tags.insert("keyspace".to_string(), event.keyspace.clone());
        tags.insert("table".to_string(), event.table.clone());

        let fields = HashMap::from([
            ("client".to_string(), event.client_address.clone()),
            ("statement".to_string(), event.statement.clone()),
        ]);

        let duration_millis = event.execution_duration_micros as f64 / 1_000.0;
        Measurement::simple(
            self.namespace.clone(),
            Some(duration_millis),
            event.timestamp_millis,
            TimeUnit::Milliseconds,
            tags,
            fields,
        )
        .ok()
    }
}

impl Module for SlowQueryModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, event: &QueryEvent) -> Vec<Measurement> {
        if !self.decider.should_report(
            event.execution_duration_micros,
            &event.keyspace,
            &event.table,
        ) {
            return Vec::new();
        }
        self.measurement(event).into_iter().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfiguration;

    fn env() -> ModuleEnv {
        ModuleEnv::new(Arc::new(GlobalConfiguration {
            hostname: "node1".to_string(),
            system_name: "prod".to_string(),
            http_api_enabled: false,
            http_api_port: 0,
        }))
    }

    fn event(duration_micros: u64, table: &str) -> QueryEvent {
        QueryEvent::new(duration_micros, "10.0.0.1:9042", "SELECT * FROM ks.t", "ks", table)
            .with_timestamp(1_000)
    }

    #[test]
    fn test_defaults_to_25ms_all_tables() {
        let module = SlowQueryModule::new(&ModuleConfiguration::new("slow_query"), &env()).unwrap();
        assert_eq!(module.decider().threshold_millis(), 25);
        assert!(module.transform(&event(24_000, "x")).is_empty());
        assert_eq!(module.transform(&event(25_000, "x")).len(), 1);
    }

    #[test]
    fn test_measurement_shape() {
        let config = ModuleConfiguration::new("slow_query")
            .with_namespace("queries")
            .with_option("slowQueryThresholdInMilliseconds", 10)
            .with_option("tablesForLogging", serde_json::json!(["ks.users"]));
        let module = SlowQueryModule::new(&config, &env()).unwrap();

        assert!(module.transform(&event(30_000, "orders")).is_empty());
        let out = module.transform(&event(30_000, "users"));
        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert_eq!(m.name(), "queries");
        assert!(m.is_simple());
        assert_eq!(m.value().unwrap(), 30.0);
        assert_eq!(m.time(), 1_000);
        assert_eq!(m.time_unit(), TimeUnit::Milliseconds);
        assert_eq!(m.tags()["host"], "node1");
        assert_eq!(m.tags()["table"], "users");
        assert_eq!(m.fields()["client"], "10.0.0.1:9042");
        assert_eq!(m.fields()["statement"], "SELECT * FROM ks.t");
    }

    #[test]
    fn test_bad_table_entry_fails_construction() {
        let config = ModuleConfiguration::new("slow_query")
            .with_option("tablesForLogging", serde_json::json!(["users"]));
        assert!(matches!(
            SlowQueryModule::new(&config, &env()),
            Err(ConfigurationError::InvalidOption { option: "tablesForLogging", .. })
        ));
    }

    #[test]
    fn test_retuned_threshold_applies() {
        let module = SlowQueryModule::new(&ModuleConfiguration::new("slow_query"), &env()).unwrap();
        module.decider().set_threshold_millis(100);
        assert!(module.transform(&event(50_000, "x")).is_empty());
    }
}
