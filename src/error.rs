//! Error types for pipeline units.
//!
//! None of these cross the dispatcher boundary: configuration errors disable a
//! single unit, sink errors are logged inside the reporter that hit them.

use thiserror::Error;

/// A module or reporter could not be built from its configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Unknown kind: {0}")]
    UnknownKind(String),

    #[error("Missing required option: {0}")]
    MissingOption(&'static str),

    #[error("Invalid option '{option}': {reason}")]
    InvalidOption { option: &'static str, reason: String },

    #[error("Malformed options: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Malformed configuration document: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure while delivering one measurement to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for acknowledgment")]
    Timeout,

    #[error("Sink rejected write: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Queue full")]
    QueueFull,

    #[error("Reporter stopped")]
    Closed,
}

/// The pipeline could not be brought up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to start scheduler runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
