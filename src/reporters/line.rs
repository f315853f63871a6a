//! Line-oriented text encoding of measurements.
//!
//! `name,tag=v,...,type=KIND field="..",...,value=V timestamp_ns`
//!
//! Tags and fields are written in key order. The `type` tag always follows
//! the measurement's own tags and the numeric `value` field (simple only)
//! always follows its string fields.

use std::fmt::Write as _;

use crate::measurement::Measurement;

/// Line terminator used by stream consumers.
pub const CRLF: &str = "\r\n";

/// Encode one measurement without a line terminator.
pub fn encode(measurement: &Measurement) -> String {
    let mut line = String::with_capacity(128);
    escape_into(&mut line, measurement.name(), &[',', ' ']);

    for (key, value) in measurement.sorted_tags() {
        line.push(',');
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        escape_into(&mut line, value, &[',', '=', ' ']);
    }
    line.push_str(",type=");
    line.push_str(measurement.kind().as_str());

    let mut first = true;
    for (key, value) in measurement.sorted_fields() {
        line.push(if first { ' ' } else { ',' });
        first = false;
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push_str("=\"");
        escape_into(&mut line, value, &['"', '\\']);
        line.push('"');
    }
    if let Ok(value) = measurement.value() {
        line.push(if first { ' ' } else { ',' });
        first = false;
        line.push_str("value=");
        line.push_str(&format_value(value));
    }
    if !first {
        let _ = write!(line, " {}", measurement.time_nanos());
    }
    line
}

/// Encode one measurement followed by CRLF.
pub fn encode_terminated(measurement: &Measurement) -> String {
    let mut line = encode(measurement);
    line.push_str(CRLF);
    line
}

/// Whether the encoded line carries at least one field.
pub fn has_fields(measurement: &Measurement) -> bool {
    measurement.is_simple() || !measurement.fields().is_empty()
}

fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
