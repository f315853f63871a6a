//! Pipeline configuration structure.
//!
//! The configuration object is supplied by an external loader. This module
//! defines its shape, the process-wide defaults, and the helper every unit uses
//! to turn its free-form `options` map into a typed, validated struct.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `DIAG_HOSTNAME` | OS hostname | Host tag attached to measurements |
//! | `DIAG_SYSTEM_NAME` | `cassandra` | System tag and message-bus key prefix |
//! | `DIAG_HTTP_API_ENABLED` | `true` | Whether the control surface is exposed |
//! | `DIAG_HTTP_API_PORT` | 8998 | Control surface port |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Free-form per-unit options.
pub type Options = serde_json::Map<String, serde_json::Value>;

const DEFAULT_SYSTEM_NAME: &str = "cassandra";
const DEFAULT_HTTP_API_PORT: u16 = 8998;

/// Settings shared read-only by all reporters and modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConfiguration {
    pub hostname: String,
    pub system_name: String,
    pub http_api_enabled: bool,
    pub http_api_port: u16,
}

impl Default for GlobalConfiguration {
    fn default() -> Self {
        Self {
            hostname: std::env::var("DIAG_HOSTNAME").unwrap_or_else(|_| detect_hostname()),
            system_name: std::env::var("DIAG_SYSTEM_NAME")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_NAME.to_string()),
            http_api_enabled: parse_bool("DIAG_HTTP_API_ENABLED", true),
            http_api_port: parse_u16("DIAG_HTTP_API_PORT", DEFAULT_HTTP_API_PORT),
        }
    }
}

impl GlobalConfiguration {
    /// Stable per-process key: `systemName + "_" + hostname`.
    pub fn partition_key(&self) -> String {
        format!("{}_{}", self.system_name, self.hostname)
    }
}

fn detect_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Parse a `bool` env var, returning `default` on missing or invalid.
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => val.parse::<bool>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u16` env var, returning `default` on missing or invalid.
fn parse_u16(key: &str, default: u16) -> u16 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u16>().unwrap_or(default),
        Err(_) => default,
    }
}

/// One configured reporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterConfiguration {
    pub kind: String,
    #[serde(default)]
    pub options: Options,
}

impl ReporterConfiguration {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), options: Options::new() }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }
}

/// One configured module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfiguration {
    pub kind: String,
    /// Measurement name; each module falls back to its own default.
    #[serde(default)]
    pub measurement_namespace: Option<String>,
    /// Reporter kinds that receive this module's output. `None` means all.
    #[serde(default)]
    pub reporters: Option<Vec<String>>,
    #[serde(default)]
    pub options: Options,
}

impl ModuleConfiguration {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            measurement_namespace: None,
            reporters: None,
            options: Options::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.measurement_namespace = Some(namespace.into());
        self
    }

    pub fn with_reporters(mut self, kinds: &[&str]) -> Self {
        self.reporters = Some(kinds.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Configured namespace, or `default` when none was given.
    pub fn namespace_or(&self, default: &str) -> String {
        self.measurement_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default)
            .to_string()
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub global: GlobalConfiguration,
    #[serde(default)]
    pub reporters: Vec<ReporterConfiguration>,
    #[serde(default)]
    pub modules: Vec<ModuleConfiguration>,
}

impl Configuration {
    /// Parse a TOML document into a configuration.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(document)?)
    }
}

/// Deserialize a unit's `options` into its typed settings.
///
/// Absent keys take the type's `#[serde(default)]` values; present keys with
/// the wrong shape are a [`ConfigurationError::Malformed`].
pub fn parse_options<T: DeserializeOwned>(options: &Options) -> Result<T, ConfigurationError> {
    Ok(serde_json::from_value(serde_json::Value::Object(options.clone()))?)
}
