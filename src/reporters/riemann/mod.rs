//! Monitoring-event reporter (Riemann over TCP).
//!
//! Every measurement is sent synchronously under one deadline of
//! `ackTimeoutMillis`, covering connect, write and the acknowledgment read.
//! A failed attempt (timeout, transport error or an error ack) is retried
//! once on a fresh connection; if that fails too the measurement is dropped.
//! Send and ack wait form one step under the connection lock, so concurrent
//! callers never read each other's ack. The host is resolved off the
//! reporting path.

mod proto;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prost::Message;
use serde::Deserialize;

use super::resolve::Resolver;
use super::{warn_disabled, Reporter, ReporterEnv};
use crate::config::{parse_options, ReporterConfiguration};
use crate::error::{ConfigurationError, SinkError};
use crate::measurement::Measurement;
use crate::telemetry;

pub use proto::{Attribute, Event, Msg};

/// Upper bound on an acknowledgment frame.
const MAX_ACK_BYTES: usize = 1024 * 1024;
const ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RiemannOptions {
    host: Option<String>,
    port: u16,
    ttl: f32,
    state: String,
    ack_timeout_millis: u64,
}

impl Default for RiemannOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: 5555,
            ttl: 30.0,
            state: "ok".to_string(),
            ack_timeout_millis: 1000,
        }
    }
}

struct Endpoint {
    resolver: Resolver,
    ack_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl Endpoint {
    fn connect(&self, deadline: Instant) -> Result<TcpStream, SinkError> {
        let addr = self.resolver.addr().ok_or_else(|| {
            SinkError::Rejected(format!("{} not resolved yet", self.resolver.host()))
        })?;
        let stream = TcpStream::connect_timeout(&addr, remaining(deadline)?).map_err(timeout_or_io)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Write one framed message and wait for its ack, as one locked step
    /// bounded by a single deadline.
    fn send(&self, frame: &[u8]) -> Result<(), SinkError> {
        let mut guard = self.stream.lock();
        let deadline = Instant::now() + self.ack_timeout;
        if guard.is_none() {
            *guard = Some(self.connect(deadline)?);
        }
        let result = match guard.as_mut() {
            Some(stream) => exchange(stream, frame, deadline),
            None => Err(SinkError::Closed),
        };
        if result.is_err() {
            // The stream may hold a late ack; never reuse it.
            *guard = None;
        }
        result
    }

    fn close(&self) {
        self.resolver.stop();
        self.stream.lock().take();
    }
}

fn exchange(stream: &mut TcpStream, frame: &[u8], deadline: Instant) -> Result<(), SinkError> {
    write_all_by(stream, frame, deadline)?;
    let mut len = [0u8; 4];
    read_exact_by(stream, &mut len, deadline)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_ACK_BYTES {
        return Err(SinkError::Rejected(format!("ack frame of {len} bytes")));
    }
    let mut body = vec![0u8; len];
    read_exact_by(stream, &mut body, deadline)?;
    let ack = Msg::decode(body.as_slice())?;
    match ack.ok {
        Some(true) => Ok(()),
        _ => Err(SinkError::Rejected(ack.error.unwrap_or_else(|| "negative ack".to_string()))),
    }
}

/// Time left before `deadline`; `Timeout` once it has passed.
fn remaining(deadline: Instant) -> Result<Duration, SinkError> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
        .ok_or(SinkError::Timeout)
}

/// `write_all` with the socket timeout re-armed to the time left before each write.
fn write_all_by(stream: &mut TcpStream, mut buf: &[u8], deadline: Instant) -> Result<(), SinkError> {
    while !buf.is_empty() {
        stream.set_write_timeout(Some(remaining(deadline)?))?;
        match stream.write(buf) {
            Ok(0) => return Err(SinkError::Io(io::ErrorKind::WriteZero.into())),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(timeout_or_io(e)),
        }
    }
    Ok(())
}

/// `read_exact` with the socket timeout re-armed to the time left before each read.
fn read_exact_by(stream: &mut TcpStream, mut buf: &mut [u8], deadline: Instant) -> Result<(), SinkError> {
    while !buf.is_empty() {
        stream.set_read_timeout(Some(remaining(deadline)?))?;
        match stream.read(buf) {
            Ok(0) => return Err(SinkError::Io(io::ErrorKind::UnexpectedEof.into())),
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(timeout_or_io(e)),
        }
    }
    Ok(())
}

fn timeout_or_io(e: io::Error) -> SinkError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => SinkError::Timeout,
        _ => SinkError::Io(e),
    }
}

pub struct RiemannReporter {
    kind: String,
    hostname: String,
    ttl: f32,
    state: String,
    endpoint: Option<Endpoint>,
    stopped: AtomicBool,
}

impl RiemannReporter {
    pub fn new(config: &ReporterConfiguration, env: &ReporterEnv) -> Result<Self, ConfigurationError> {
        let options: RiemannOptions = parse_options(&config.options)?;
        let kind = config.kind.clone();
        if options.ack_timeout_millis == 0 {
            return Err(ConfigurationError::InvalidOption {
                option: "ackTimeoutMillis",
                reason: "must be greater than zero".to_string(),
            });
        }
        let endpoint = match options.host.filter(|h| !h.is_empty()) {
            Some(host) => Some(Endpoint {
                resolver: Resolver::new(&kind, host, options.port, &env.scheduler),
                ack_timeout: Duration::from_millis(options.ack_timeout_millis),
                stream: Mutex::new(None),
            }),
            None => {
                warn_disabled(&kind, "host");
                None
            }
        };
        Ok(Self {
            kind,
            hostname: env.global.hostname.clone(),
            ttl: options.ttl,
            state: options.state,
            endpoint,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Monitoring event for one measurement.
    pub fn event(&self, measurement: &Measurement) -> Event {
        let nanos = measurement.time_nanos();
        Event {
            time: Some(nanos / 1_000_000_000),
            time_micros: Some(nanos / 1_000),
            state: Some(self.state.clone()),
            service: Some(measurement.name().to_string()),
            host: Some(self.hostname.clone()),
            description: None,
            tags: measurement
                .sorted_tags()
                .into_iter()
                .map(|(k, v)| format!("{k}:{v}"))
                .collect(),
            ttl: Some(self.ttl),
            attributes: measurement
                .sorted_fields()
                .into_iter()
                .map(|(k, v)| Attribute { key: k.to_string(), value: Some(v.to_string()) })
                .collect(),
            metric_d: measurement.value().ok(),
        }
    }
}

impl Reporter for RiemannReporter {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn report(&self, measurement: &Measurement) {
        let Some(endpoint) = &self.endpoint else { return };
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let frame = Msg::events(vec![self.event(measurement)]).encode_framed();

        let mut last_error = None;
        for attempt in 1..=ATTEMPTS {
            match endpoint.send(&frame) {
                Ok(()) => {
                    telemetry::record_report(&self.kind);
                    return;
                }
                Err(e) => {
                    tracing::debug!(reporter = %self.kind, attempt, error = %e, "event send failed");
                    last_error = Some(e);
                }
            }
        }
        telemetry::record_report_failure(&self.kind);
        if let Some(e) = last_error {
            tracing::warn!(reporter = %self.kind, measurement = %measurement.name(), error = %e,
                "event dropped after retry");
        }
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(endpoint) = &self.endpoint {
            endpoint.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfiguration;
    use crate::measurement::TimeUnit;
    use crate::scheduler::Scheduler;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn test_event_shape() {
        let scheduler = Scheduler::new().unwrap();
        let mut global = GlobalConfiguration::default();
        global.hostname = "node1".to_string();
        let env = ReporterEnv::new(Arc::new(global), scheduler.handle());
        let reporter = RiemannReporter::new(&ReporterConfiguration::new("riemann"), &env).unwrap();
        assert!(!reporter.is_enabled());

        let m = Measurement::simple(
            "slow_query",
            Some(31.0),
            2_500,
            TimeUnit::Milliseconds,
            HashMap::from([("table".to_string(), "users".to_string())]),
            HashMap::from([("client".to_string(), "c1".to_string())]),
        )
        .unwrap();
        let event = reporter.event(&m);
        assert_eq!(event.service.as_deref(), Some("slow_query"));
        assert_eq!(event.host.as_deref(), Some("node1"));
        assert_eq!(event.state.as_deref(), Some("ok"));
        assert_eq!(event.metric_d, Some(31.0));
        assert_eq!(event.ttl, Some(30.0));
        assert_eq!(event.time, Some(2));
        assert_eq!(event.tags, vec!["table:users".to_string()]);
        assert_eq!(event.attributes[0].key, "client");
    }

    #[test]
    fn test_deadline_in_the_past_times_out() {
        assert!(matches!(remaining(Instant::now()), Err(SinkError::Timeout)));
        assert!(remaining(Instant::now() + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_framed_roundtrip_length_prefix() {
        let frame = Msg::ack().encode_framed();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        assert_eq!(Msg::decode(&frame[4..]).unwrap().ok, Some(true));
    }
}
