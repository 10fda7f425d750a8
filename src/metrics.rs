//! Telemetry helpers for refresh and connection outcomes.

// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_REFRESH_TOTAL: &str = "cloudsql_refresh_total";
const METRIC_REFRESH_DURATION: &str = "cloudsql_refresh_duration_seconds";
const METRIC_REFRESH_ERRORS: &str = "cloudsql_refresh_errors_total";
const METRIC_CONNECT_TOTAL: &str = "cloudsql_connect_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle =
		PrometheusBuilder::new().install_recorder().map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a successful refresh attempt along with its latency.
pub fn record_refresh_success(instance: &str, duration: Duration) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(instance, "success").iter()).increment(1);
	metrics::histogram!(METRIC_REFRESH_DURATION, base_labels(instance).iter())
		.record(duration.as_secs_f64());
}

/// Record a failed refresh attempt.
pub fn record_refresh_error(instance: &str) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(instance, "error").iter()).increment(1);
	metrics::counter!(METRIC_REFRESH_ERRORS, base_labels(instance).iter()).increment(1);
}

/// Record a completed socket connection.
pub fn record_connect_success(instance: &str) {
	metrics::counter!(METRIC_CONNECT_TOTAL, status_labels(instance, "success").iter()).increment(1);
}

/// Record a failed socket connection.
pub fn record_connect_error(instance: &str) {
	metrics::counter!(METRIC_CONNECT_TOTAL, status_labels(instance, "error").iter()).increment(1);
}

fn base_labels(instance: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("instance", instance.to_owned()));

	labels
}

fn status_labels(instance: &str, status: &'static str) -> LabelSet {
	let mut labels = base_labels(instance);

	labels.push(Label::new("status", status));

	labels
}
