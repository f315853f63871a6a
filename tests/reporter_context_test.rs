//! Fan-out and failure isolation of the reporter context.

mod common;

use std::sync::Arc;

use common::{registry_with_capture, simple, CaptureReporter, PanickingReporter};
use diagnostics_core::config::{GlobalConfiguration, ReporterConfiguration};
use diagnostics_core::reporters::{Reporter, ReporterContext, ReporterEnv};
use diagnostics_core::scheduler::Scheduler;
use parking_lot::Mutex;

#[test]
fn panicking_reporter_does_not_starve_the_others() {
    let (first, first_seen) = CaptureReporter::new("first");
    let (last, last_seen) = CaptureReporter::new("last");
    let reporters: Vec<Arc<dyn Reporter>> = vec![first, Arc::new(PanickingReporter), last];
    let context = ReporterContext::from_reporters(reporters);

    context.report(&simple("m", 1.0));

    assert_eq!(first_seen.lock().len(), 1);
    assert_eq!(last_seen.lock().len(), 1);
}

#[test]
fn empty_context_discards_measurements() {
    let context = ReporterContext::default();
    assert!(context.is_empty());
    context.report(&simple("m", 1.0));
    context.stop();
}

#[test]
fn stop_survives_panicking_reporter() {
    let context = ReporterContext::from_reporters(vec![Arc::new(PanickingReporter)]);
    context.stop();
    context.stop();
}

#[test]
fn build_skips_unknown_and_failing_kinds() {
    let scheduler = Scheduler::new().unwrap();
    let env = ReporterEnv::new(Arc::new(GlobalConfiguration::default()), scheduler.handle());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = registry_with_capture(seen.clone());

    let context = ReporterContext::build(
        &[
            ReporterConfiguration::new("nonexistent"),
            ReporterConfiguration::new("broken"),
            ReporterConfiguration::new("capture"),
            ReporterConfiguration::new("log").with_option("level", "loud"),
            ReporterConfiguration::new("log"),
        ],
        &registry,
        &env,
    );

    assert_eq!(context.kinds(), vec!["capture", "log"]);
    context.report(&simple("m", 2.0));
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn disabled_reporters_still_join_the_context() {
    let scheduler = Scheduler::new().unwrap();
    let env = ReporterEnv::new(Arc::new(GlobalConfiguration::default()), scheduler.handle());
    let registry = registry_with_capture(Arc::new(Mutex::new(Vec::new())));

    let context = ReporterContext::build(
        &[
            ReporterConfiguration::new("influxdb"),
            ReporterConfiguration::new("datadog"),
            ReporterConfiguration::new("kafka"),
            ReporterConfiguration::new("riemann"),
        ],
        &registry,
        &env,
    );

    assert_eq!(context.len(), 4);
    context.report(&simple("m", 1.0));
    context.stop();
}

#[test]
fn report_to_filters_by_kind() {
    let (a, a_seen) = CaptureReporter::new("a");
    let (b, b_seen) = CaptureReporter::new("b");
    let reporters: Vec<Arc<dyn Reporter>> = vec![a, b];
    let context = ReporterContext::from_reporters(reporters);

    context.report_to(&simple("m", 1.0), Some(&["b".to_string()]));
    context.report_to(&simple("m", 1.0), None);

    assert_eq!(a_seen.lock().len(), 1);
    assert_eq!(b_seen.lock().len(), 2);
}
