//! Time-series reporter (InfluxDB HTTP line protocol).
//!
//! `report` only encodes the measurement and enqueues it on a bounded queue.
//! A background task on the scheduler runtime drains the queue and writes
//! batches when `batchSize` points are pending or every `flushPeriodMillis`.
//! Failed writes are logged and the batch is dropped; there is no retry here.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{line, warn_disabled, Reporter, ReporterEnv};
use crate::config::{parse_options, ReporterConfiguration};
use crate::error::{ConfigurationError, SinkError};
use crate::measurement::Measurement;
use crate::telemetry;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InfluxOptions {
    url: Option<String>,
    database: String,
    username: Option<String>,
    password: Option<String>,
    retention_policy: String,
    batch_size: usize,
    flush_period_millis: u64,
    queue_capacity: usize,
}

impl Default for InfluxOptions {
    fn default() -> Self {
        Self {
            url: None,
            database: "diagnostics".to_string(),
            username: None,
            password: None,
            retention_policy: "autogen".to_string(),
            batch_size: 1000,
            flush_period_millis: 1000,
            queue_capacity: 10_000,
        }
    }
}

struct Live {
    queue: mpsc::Sender<String>,
    shutdown: CancellationToken,
}

pub struct InfluxReporter {
    kind: String,
    live: Option<Live>,
    dropped: AtomicU64,
    stopped: AtomicBool,
}

impl InfluxReporter {
    pub fn new(config: &ReporterConfiguration, env: &ReporterEnv) -> Result<Self, ConfigurationError> {
        let options: InfluxOptions = parse_options(&config.options)?;
        let kind = config.kind.clone();

        let Some(url) = options.url.as_deref().filter(|u| !u.is_empty()) else {
            warn_disabled(&kind, "url");
            return Ok(Self {
                kind,
                live: None,
                dropped: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            });
        };
        for (option, value) in [
            ("batchSize", options.batch_size as u64),
            ("queueCapacity", options.queue_capacity as u64),
            ("flushPeriodMillis", options.flush_period_millis),
        ] {
            if value == 0 {
                return Err(ConfigurationError::InvalidOption {
                    option,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        let write_url = Url::parse_with_params(
            &format!("{}/write", url.trim_end_matches('/')),
            &[
                ("db", options.database.as_str()),
                ("rp", options.retention_policy.as_str()),
                ("precision", "ns"),
            ],
        )
        .map_err(|e| ConfigurationError::InvalidOption { option: "url", reason: e.to_string() })?;

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ConfigurationError::InvalidOption { option: "url", reason: e.to_string() })?;

        let writer = BatchWriter {
            kind: kind.clone(),
            client,
            write_url,
            credentials: options.username.clone().map(|u| (u, options.password.clone())),
        };

        let (queue, rx) = mpsc::channel(options.queue_capacity);
        let shutdown = CancellationToken::new();
        env.scheduler.spawn(run_flusher(
            rx,
            writer,
            options.batch_size,
            Duration::from_millis(options.flush_period_millis),
            shutdown.clone(),
        ));

        tracing::info!(reporter = %kind, url = %url, database = %options.database,
            batch_size = options.batch_size, "influxdb reporter started");
        Ok(Self {
            kind,
            live: Some(Live { queue, shutdown }),
            dropped: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.live.is_some()
    }

    /// Points dropped because the write queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(&self, live: &Live, point: String) -> Result<(), SinkError> {
        live.queue.try_send(point).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::QueueFull,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

impl Reporter for InfluxReporter {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn report(&self, measurement: &Measurement) {
        let Some(live) = &self.live else { return };
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        if !line::has_fields(measurement) {
            tracing::debug!(reporter = %self.kind, measurement = %measurement.name(),
                "skipping measurement without fields");
            return;
        }
        match self.enqueue(live, line::encode(measurement)) {
            Ok(()) => telemetry::record_report(&self.kind),
            Err(SinkError::QueueFull) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                telemetry::record_dropped(&self.kind);
                tracing::warn!(reporter = %self.kind, "write queue full, measurement dropped");
            }
            Err(_) => {}
        }
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(live) = &self.live {
            live.shutdown.cancel();
            tracing::info!(reporter = %self.kind, "influxdb reporter stopped");
        }
    }
}

struct BatchWriter {
    kind: String,
    client: Client,
    write_url: Url,
    credentials: Option<(String, Option<String>)>,
}

impl BatchWriter {
    async fn write(&self, batch: &[String]) -> Result<(), SinkError> {
        let mut request = self.client.post(self.write_url.clone()).body(batch.join("\n"));
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SinkError::Rejected(format!("{status}: {body}")))
        }
    }

    async fn flush(&self, batch: &mut Vec<String>) {
        if batch.is_empty() {
            return;
        }
        match self.write(batch).await {
            Ok(()) => tracing::debug!(reporter = %self.kind, points = batch.len(), "batch written"),
            Err(e) => {
                telemetry::record_report_failure(&self.kind);
                tracing::warn!(reporter = %self.kind, points = batch.len(), error = %e,
                    "batch write failed, points dropped");
            }
        }
        batch.clear();
    }
}

async fn run_flusher(
    mut rx: mpsc::Receiver<String>,
    writer: BatchWriter,
    batch_size: usize,
    flush_period: Duration,
    shutdown: CancellationToken,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            point = rx.recv() => match point {
                Some(point) => {
                    batch.push(point);
                    if batch.len() >= batch_size {
                        writer.flush(&mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => writer.flush(&mut batch).await,
        }
    }

    rx.close();
    while let Ok(point) = rx.try_recv() {
        batch.push(point);
        if batch.len() >= batch_size {
            writer.flush(&mut batch).await;
        }
    }
    writer.flush(&mut batch).await;
}
