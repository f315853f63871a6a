//! Self-health counters recorded through the `metrics` facade.
//!
//! The library never installs a recorder; without one these are no-ops.

pub fn record_measurement(module: &str) {
    metrics::counter!("diagnostics_measurements_total", "module" => module.to_string()).increment(1);
}

pub fn record_report(reporter: &str) {
    metrics::counter!("diagnostics_reports_total", "reporter" => reporter.to_string()).increment(1);
}

pub fn record_report_failure(reporter: &str) {
    metrics::counter!("diagnostics_report_failures_total", "reporter" => reporter.to_string())
        .increment(1);
}

pub fn record_dropped(reporter: &str) {
    metrics::counter!("diagnostics_dropped_total", "reporter" => reporter.to_string()).increment(1);
}

pub fn record_module_init_failure(kind: &str) {
    metrics::counter!("diagnostics_module_init_failures_total", "kind" => kind.to_string())
        .increment(1);
}

pub fn record_reporter_init_failure(kind: &str) {
    metrics::counter!("diagnostics_reporter_init_failures_total", "kind" => kind.to_string())
        .increment(1);
}

pub fn record_reload() {
    metrics::counter!("diagnostics_reloads_total").increment(1);
}
