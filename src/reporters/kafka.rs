//! Message-bus reporter (Kafka).
//!
//! Each measurement is serialized and handed to a threaded producer, keyed
//! by `systemName + "_" + hostname` so one host's stream stays ordered within
//! its partition. `send` only enqueues into the producer's bounded buffer;
//! network delivery and its failures are handled on the producer thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use once_cell::sync::OnceCell;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaResult;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::ClientContext;
use serde::Deserialize;

use super::{line, warn_disabled, Reporter, ReporterEnv};
use crate::config::{parse_options, ReporterConfiguration};
use crate::error::{ConfigurationError, SinkError};
use crate::measurement::Measurement;
use crate::telemetry;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Payload encoding for published measurements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// CRLF-terminated line encoding, see [`line`].
    #[default]
    Line,
    /// Compact JSON object.
    Json,
}

impl PayloadFormat {
    pub fn encode(&self, measurement: &Measurement) -> Result<String, SinkError> {
        match self {
            Self::Line => Ok(line::encode_terminated(measurement)),
            Self::Json => {
                serde_json::to_string(measurement).map_err(|e| SinkError::Encode(e.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct KafkaOptions {
    bootstrap_servers: Option<String>,
    topic: String,
    format: PayloadFormat,
    queue_buffering_max_messages: u32,
    message_timeout_ms: u32,
}

impl Default for KafkaOptions {
    fn default() -> Self {
        Self {
            bootstrap_servers: None,
            topic: "diagnostics".to_string(),
            format: PayloadFormat::Line,
            queue_buffering_max_messages: 10_000,
            message_timeout_ms: 5_000,
        }
    }
}

/// Logs deliveries that failed after leaving the local queue.
struct DeliveryLogger {
    kind: String,
}

impl ClientContext for DeliveryLogger {}

impl ProducerContext for DeliveryLogger {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        if let Err((e, _)) = result {
            telemetry::record_report_failure(&self.kind);
            tracing::warn!(reporter = %self.kind, error = %e, "message delivery failed");
        }
    }
}

struct Connection {
    config: ClientConfig,
    producer: OnceCell<ThreadedProducer<DeliveryLogger>>,
}

pub struct KafkaReporter {
    kind: String,
    topic: String,
    key: String,
    format: PayloadFormat,
    connection: Option<Connection>,
    stopped: AtomicBool,
}

impl KafkaReporter {
    pub fn new(config: &ReporterConfiguration, env: &ReporterEnv) -> Result<Self, ConfigurationError> {
        let options: KafkaOptions = parse_options(&config.options)?;
        let kind = config.kind.clone();
        if options.topic.is_empty() {
            return Err(ConfigurationError::InvalidOption {
                option: "topic",
                reason: "must not be empty".to_string(),
            });
        }

        let connection = match options.bootstrap_servers.filter(|s| !s.is_empty()) {
            Some(servers) => {
                let mut client = ClientConfig::new();
                client
                    .set("bootstrap.servers", &servers)
                    .set(
                        "queue.buffering.max.messages",
                        options.queue_buffering_max_messages.to_string(),
                    )
                    .set("message.timeout.ms", options.message_timeout_ms.to_string());
                Some(Connection { config: client, producer: OnceCell::new() })
            }
            None => {
                warn_disabled(&kind, "bootstrapServers");
                None
            }
        };

        Ok(Self {
            kind,
            topic: options.topic,
            key: env.global.partition_key(),
            format: options.format,
            connection,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.connection.is_some()
    }

    /// Key every record is published under.
    pub fn partition_key(&self) -> &str {
        &self.key
    }

    fn producer<'a>(&self, connection: &'a Connection) -> KafkaResult<&'a ThreadedProducer<DeliveryLogger>> {
        connection.producer.get_or_try_init(|| {
            tracing::info!(reporter = %self.kind, topic = %self.topic, "connecting kafka producer");
            connection
                .config
                .create_with_context(DeliveryLogger { kind: self.kind.clone() })
        })
    }

    fn publish(&self, connection: &Connection, measurement: &Measurement) -> Result<(), SinkError> {
        let payload = self.format.encode(measurement)?;
        let producer = self.producer(connection)?;
        producer
            .send(BaseRecord::to(&self.topic).key(&self.key).payload(&payload))
            .map_err(|(e, _)| SinkError::Kafka(e))
    }
}

impl Reporter for KafkaReporter {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn report(&self, measurement: &Measurement) {
        let Some(connection) = &self.connection else { return };
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        match self.publish(connection, measurement) {
            Ok(()) => telemetry::record_report(&self.kind),
            Err(e) => {
                telemetry::record_report_failure(&self.kind);
                tracing::warn!(reporter = %self.kind, error = %e, "failed to publish measurement");
            }
        }
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(producer) = self.connection.as_ref().and_then(|c| c.producer.get()) else {
            return;
        };
        if let Err(e) = producer.flush(FLUSH_TIMEOUT) {
            tracing::warn!(reporter = %self.kind, error = %e, "pending messages not flushed");
        }
    }
}
