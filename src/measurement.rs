//! Measurement value object.
//!
//! A [`Measurement`] is produced by a module in response to one query event or
//! timer tick and is then read by every reporter. It is immutable once built.
//! Wire encodings live with the reporters; this type only exposes the data.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Contract violations when building or reading a measurement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeasurementError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Whether a measurement carries a scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeasurementKind {
    /// Carries a scalar `value`.
    Simple,
    /// Structured only, no value.
    Complex,
}

impl MeasurementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "SIMPLE",
            Self::Complex => "COMPLEX",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution of a measurement timestamp or a configured period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Number of nanoseconds in one unit.
    fn nanos_per_unit(&self) -> i64 {
        match self {
            Self::Nanoseconds => 1,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1_000_000,
            Self::Seconds => 1_000_000_000,
            Self::Minutes => 60 * 1_000_000_000,
            Self::Hours => 3_600 * 1_000_000_000,
            Self::Days => 86_400 * 1_000_000_000,
        }
    }

    /// Convert `value` expressed in this unit to nanoseconds, saturating on overflow.
    pub fn to_nanos(&self, value: i64) -> i64 {
        value.saturating_mul(self.nanos_per_unit())
    }

    /// Convert `value` expressed in this unit to milliseconds (truncating).
    pub fn to_millis(&self, value: i64) -> i64 {
        self.to_nanos(value) / 1_000_000
    }

    /// Build a [`Duration`] of `count` units.
    pub fn duration(&self, count: u64) -> Duration {
        let nanos = (count as u128).saturating_mul(self.nanos_per_unit() as u128);
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nanoseconds => "NANOSECONDS",
            Self::Microseconds => "MICROSECONDS",
            Self::Milliseconds => "MILLISECONDS",
            Self::Seconds => "SECONDS",
            Self::Minutes => "MINUTES",
            Self::Hours => "HOURS",
            Self::Days => "DAYS",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    /// Accepts the upper-case unit names (`"MINUTES"`) case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NANOSECONDS" => Ok(Self::Nanoseconds),
            "MICROSECONDS" => Ok(Self::Microseconds),
            "MILLISECONDS" => Ok(Self::Milliseconds),
            "SECONDS" => Ok(Self::Seconds),
            "MINUTES" => Ok(Self::Minutes),
            "HOURS" => Ok(Self::Hours),
            "DAYS" => Ok(Self::Days),
            other => Err(format!("unknown time unit '{other}'")),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable unit of telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    name: String,
    kind: MeasurementKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    time: i64,
    time_unit: TimeUnit,
    tags: HashMap<String, String>,
    fields: HashMap<String, String>,
}

impl Measurement {
    /// Create a measurement carrying a scalar value.
    ///
    /// # Errors
    /// Returns [`MeasurementError::InvalidArgument`] when `value` is `None`.
    pub fn simple(
        name: impl Into<String>,
        value: Option<f64>,
        time: i64,
        time_unit: TimeUnit,
        tags: HashMap<String, String>,
        fields: HashMap<String, String>,
    ) -> Result<Self, MeasurementError> {
        let name = name.into();
        let value = value.ok_or_else(|| {
            MeasurementError::InvalidArgument(format!(
                "simple measurement '{name}' requires a value"
            ))
        })?;
        Ok(Self {
            name,
            kind: MeasurementKind::Simple,
            value: Some(value),
            time,
            time_unit,
            tags,
            fields,
        })
    }

    /// Create a structured measurement without a value.
    pub fn complex(
        name: impl Into<String>,
        time: i64,
        time_unit: TimeUnit,
        tags: HashMap<String, String>,
        fields: HashMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: MeasurementKind::Complex,
            value: None,
            time,
            time_unit,
            tags,
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MeasurementKind {
        self.kind
    }

    pub fn is_simple(&self) -> bool {
        self.kind == MeasurementKind::Simple
    }

    pub fn is_complex(&self) -> bool {
        self.kind == MeasurementKind::Complex
    }

    /// Scalar value of a simple measurement.
    ///
    /// # Errors
    /// Returns [`MeasurementError::InvalidState`] for complex measurements.
    pub fn value(&self) -> Result<f64, MeasurementError> {
        self.value.ok_or_else(|| {
            MeasurementError::InvalidState(format!(
                "complex measurement '{}' has no value",
                self.name
            ))
        })
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Timestamp converted to nanoseconds.
    pub fn time_nanos(&self) -> i64 {
        self.time_unit.to_nanos(self.time)
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    /// Tags as `(key, value)` pairs ordered by key.
    pub fn sorted_tags(&self) -> Vec<(&str, &str)> {
        sorted_pairs(&self.tags)
    }

    /// Fields as `(key, value)` pairs ordered by key.
    pub fn sorted_fields(&self) -> Vec<(&str, &str)> {
        sorted_pairs(&self.fields)
    }
}

fn sorted_pairs(map: &HashMap<String, String>) -> Vec<(&str, &str)> {
    let mut pairs: Vec<(&str, &str)> = map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
    pairs
}
