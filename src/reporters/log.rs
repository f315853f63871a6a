//! Log reporter: writes measurements as structured tracing events.

use std::fmt::Write as _;

use serde::Deserialize;
use tracing::{event, Level, Span};

use super::Reporter;
use crate::config::{parse_options, ReporterConfiguration};
use crate::error::ConfigurationError;
use crate::measurement::Measurement;
use crate::telemetry;

/// Event target for reported measurements, so hosts can route them separately.
pub const MEASUREMENT_TARGET: &str = "diagnostics::measurement";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LogOptions {
    level: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

pub struct LogReporter {
    kind: String,
    level: Level,
}

impl LogReporter {
    pub fn new(config: &ReporterConfiguration) -> Result<Self, ConfigurationError> {
        let options: LogOptions = parse_options(&config.options)?;
        let level = options.level.parse::<Level>().map_err(|e| {
            ConfigurationError::InvalidOption { option: "level", reason: e.to_string() }
        })?;
        Ok(Self { kind: config.kind.clone(), level })
    }

    /// `name [time=.., value=.., tags={..}, fields={..}]`
    pub fn format(measurement: &Measurement) -> String {
        let mut line = format!("{} [time={}", measurement.name(), measurement.time());
        if let Ok(value) = measurement.value() {
            let _ = write!(line, ", value={value}");
        }
        line.push_str(", tags=");
        write_map(&mut line, &measurement.sorted_tags());
        line.push_str(", fields=");
        write_map(&mut line, &measurement.sorted_fields());
        line.push(']');
        line
    }
}

fn write_map(out: &mut String, pairs: &[(&str, &str)]) {
    out.push('{');
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{key}={value}");
    }
    out.push('}');
}

impl Reporter for LogReporter {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn report(&self, measurement: &Measurement) {
        let line = Self::format(measurement);
        // event! needs a constant level; no parent so surrounding spans stay out of the line.
        match self.level {
            Level::ERROR => event!(target: MEASUREMENT_TARGET, parent: Span::none(), Level::ERROR, "{}", line),
            Level::WARN => event!(target: MEASUREMENT_TARGET, parent: Span::none(), Level::WARN, "{}", line),
            Level::INFO => event!(target: MEASUREMENT_TARGET, parent: Span::none(), Level::INFO, "{}", line),
            Level::DEBUG => event!(target: MEASUREMENT_TARGET, parent: Span::none(), Level::DEBUG, "{}", line),
            Level::TRACE => event!(target: MEASUREMENT_TARGET, parent: Span::none(), Level::TRACE, "{}", line),
        }
        telemetry::record_report(&self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::TimeUnit;
    use std::collections::HashMap;

    #[test]
    fn test_format_simple() {
        let m = Measurement::simple(
            "slow_query",
            Some(30.0),
            1000,
            TimeUnit::Milliseconds,
            HashMap::from([("host".to_string(), "h".to_string())]),
            HashMap::from([("client".to_string(), "c".to_string())]),
        )
        .unwrap();
        assert_eq!(
            LogReporter::format(&m),
            "slow_query [time=1000, value=30, tags={host=h}, fields={client=c}]"
        );
    }

    #[test]
    fn test_format_complex_has_no_value() {
        let m = Measurement::complex("beat", 7, TimeUnit::Seconds, HashMap::new(), HashMap::new());
        assert_eq!(LogReporter::format(&m), "beat [time=7, tags={}, fields={}]");
    }

    #[test]
    fn test_invalid_level_rejected() {
        let config = ReporterConfiguration::new("log").with_option("level", "loud");
        assert!(LogReporter::new(&config).is_err());
    }
}
