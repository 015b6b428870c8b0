//! Metrics definitions for the signal service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `signal_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded. Message handling latency
/// is dominated by media engine calls, so its buckets extend to one second.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("signal_message".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of open signaling connections.
///
/// Metric: `signal_connections_active`
pub fn set_connections_active(count: u64) {
    // u64 to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("signal_connections_active").set(count as f64);
}

/// Record one handled inbound message and its handling latency.
///
/// Metrics: `signal_messages_total`, `signal_message_latency_seconds`
/// Labels: `message_type` (join, description, trickle, update_settings)
pub fn record_message(message_type: &'static str, duration: Duration) {
    counter!("signal_messages_total", "message_type" => message_type).increment(1);
    histogram!("signal_message_latency_seconds", "message_type" => message_type)
        .record(duration.as_secs_f64());
}

/// Record a broadcast stream event.
///
/// Metric: `signal_stream_events_total`
/// Labels: `state` (add, remove)
pub fn record_stream_event(state: &'static str) {
    counter!("signal_stream_events_total", "state" => state).increment(1);
}

/// Record a stream event that could not be delivered to one session.
///
/// Metric: `signal_stream_events_dropped_total`
/// Labels: `reason` (full, closed)
pub fn record_stream_event_dropped(reason: &'static str) {
    counter!("signal_stream_events_dropped_total", "reason" => reason).increment(1);
}

/// Record an `Error` message sent to a client.
///
/// Metric: `signal_protocol_errors_total`
/// Labels: `code` (bounded by `ErrorCode`)
pub fn record_protocol_error(code: &'static str) {
    counter!("signal_protocol_errors_total", "code" => code).increment(1);
}

/// Record how a session ended.
///
/// Metric: `signal_session_terminations_total`
/// Labels: `outcome` (clean, internal, unknown, transport)
pub fn record_session_termination(outcome: &'static str) {
    counter!("signal_session_terminations_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    fn counter_value(
        snapshot: &[(
            metrics_util::CompositeKey,
            Option<metrics::Unit>,
            Option<metrics::SharedString>,
            DebugValue,
        )],
        name: &str,
        label: (&str, &str),
    ) -> Option<u64> {
        snapshot.iter().find_map(|(key, _, _, value)| {
            let matches = key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label.0 && l.value() == label.1);
            match (matches, value) {
                (true, DebugValue::Counter(count)) => Some(*count),
                _ => None,
            }
        })
    }

    #[test]
    fn test_counters_are_labelled() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_message("join", Duration::from_millis(3));
            record_message("join", Duration::from_millis(4));
            record_stream_event("add");
            record_protocol_error("bad_request");
            record_session_termination("clean");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert_eq!(
            counter_value(&snapshot, "signal_messages_total", ("message_type", "join")),
            Some(2)
        );
        assert_eq!(
            counter_value(&snapshot, "signal_stream_events_total", ("state", "add")),
            Some(1)
        );
        assert_eq!(
            counter_value(&snapshot, "signal_protocol_errors_total", ("code", "bad_request")),
            Some(1)
        );
        assert_eq!(
            counter_value(
                &snapshot,
                "signal_session_terminations_total",
                ("outcome", "clean")
            ),
            Some(1)
        );
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_connections_active(0);
        set_connections_active(10_000);
        record_message("trickle", Duration::from_micros(250));
        record_stream_event("remove");
    }
}
