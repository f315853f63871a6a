//! Metrics daemon reporter (DogStatsD gauges over UDP).
//!
//! Fire-and-forget: every simple measurement becomes one
//! `name:value|g|#key:value,...` datagram on a non-blocking socket. The host
//! is resolved off the reporting path; until it resolves, gauges are dropped.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use serde::Deserialize;

use super::resolve::Resolver;
use super::{warn_disabled, Reporter, ReporterEnv};
use crate::config::{parse_options, ReporterConfiguration};
use crate::error::{ConfigurationError, SinkError};
use crate::measurement::Measurement;
use crate::telemetry;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DatadogOptions {
    host: Option<String>,
    port: u16,
    prefix: Option<String>,
}

impl Default for DatadogOptions {
    fn default() -> Self {
        Self { host: None, port: 8125, prefix: None }
    }
}

struct Target {
    resolver: Resolver,
    socket: OnceCell<UdpSocket>,
}

impl Target {
    /// Bind and connect on first use once the address is known; concurrent
    /// callers share one socket.
    fn socket(&self) -> Result<&UdpSocket, SinkError> {
        let addr = self.resolver.addr().ok_or_else(|| {
            SinkError::Rejected(format!("{} not resolved yet", self.resolver.host()))
        })?;
        self.socket.get_or_try_init(|| {
            let bind: SocketAddr = match addr {
                SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
                SocketAddr::V6(_) => ([0u16; 8], 0).into(),
            };
            let socket = UdpSocket::bind(bind)?;
            socket.connect(addr)?;
            socket.set_nonblocking(true)?;
            Ok(socket)
        })
    }
}

pub struct DatadogReporter {
    kind: String,
    prefix: Option<String>,
    target: Option<Target>,
    stopped: AtomicBool,
}

impl DatadogReporter {
    pub fn new(config: &ReporterConfiguration, env: &ReporterEnv) -> Result<Self, ConfigurationError> {
        let options: DatadogOptions = parse_options(&config.options)?;
        let kind = config.kind.clone();
        let target = match options.host.filter(|h| !h.is_empty()) {
            Some(host) => Some(Target {
                resolver: Resolver::new(&kind, host, options.port, &env.scheduler),
                socket: OnceCell::new(),
            }),
            None => {
                warn_disabled(&kind, "host");
                None
            }
        };
        Ok(Self {
            kind,
            prefix: options.prefix.filter(|p| !p.is_empty()),
            target,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    /// DogStatsD gauge for a simple measurement; `None` for complex ones.
    pub fn encode(prefix: Option<&str>, measurement: &Measurement) -> Option<String> {
        let value = measurement.value().ok()?;
        let mut datagram = String::with_capacity(64);
        if let Some(prefix) = prefix {
            datagram.push_str(prefix);
            datagram.push('.');
        }
        datagram.push_str(&sanitize(measurement.name()));
        datagram.push(':');
        datagram.push_str(&value.to_string());
        datagram.push_str("|g");

        let tags = flatten_tags(measurement);
        if !tags.is_empty() {
            datagram.push_str("|#");
            datagram.push_str(&tags.join(","));
        }
        Some(datagram)
    }
}

/// Tags flattened to `key:value` strings in key order.
fn flatten_tags(measurement: &Measurement) -> Vec<String> {
    measurement
        .sorted_tags()
        .into_iter()
        .map(|(key, value)| format!("{}:{}", sanitize(key), sanitize(value)))
        .collect()
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if matches!(c, '|' | ',' | '#' | ':' | '\n') { '_' } else { c })
        .collect()
}

impl Reporter for DatadogReporter {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn report(&self, measurement: &Measurement) {
        let Some(target) = &self.target else { return };
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let Some(datagram) = Self::encode(self.prefix.as_deref(), measurement) else {
            tracing::debug!(reporter = %self.kind, measurement = %measurement.name(),
                "skipping measurement without value");
            return;
        };
        let result = target
            .socket()
            .and_then(|socket| socket.send(datagram.as_bytes()).map_err(SinkError::from));
        match result {
            Ok(_) => telemetry::record_report(&self.kind),
            Err(e) => {
                telemetry::record_report_failure(&self.kind);
                tracing::warn!(reporter = %self.kind, error = %e, "failed to send gauge");
            }
        }
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(target) = &self.target {
            target.resolver.stop();
        }
    }
}
