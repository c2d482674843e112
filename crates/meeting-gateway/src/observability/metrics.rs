//! Metrics definitions for the Meeting Gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mg_` prefix for Meeting Gateway
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 3 values (gateway, meeting, connection)
//! - `outcome` (admissions): host_joined, pending, accepted, rejected, evicted
//! - `kind`: audio, video
//! - `event`: bounded by the push event names (10 values)
//! - `request`: bounded by the signaling request names (15 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle used
/// to render `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("mg_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set request latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `mg_meetings_active`
pub fn set_meetings_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mg_meetings_active").set(count as f64);
}

/// Metric: `mg_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mg_connections_active").set(count as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Record an admission decision.
///
/// Metric: `mg_admissions_total`
/// Labels: `outcome`
pub fn record_admission(outcome: &str) {
    counter!("mg_admissions_total", "outcome" => outcome.to_string()).increment(1);
}

/// Metric: `mg_producers_created_total`
/// Labels: `kind`
pub fn record_producer_created(kind: &str) {
    counter!("mg_producers_created_total", "kind" => kind.to_string()).increment(1);
}

/// Record a push dropped because the client's event channel was full.
///
/// Metric: `mg_events_dropped_total`
/// Labels: `event`
pub fn record_event_dropped(event: &str) {
    counter!("mg_events_dropped_total", "event" => event.to_string()).increment(1);
}

/// Metric: `mg_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("mg_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

// ============================================================================
// Histograms
// ============================================================================

/// Record how long a signaling request took end to end inside the gateway.
///
/// Metric: `mg_request_duration_seconds`
/// Labels: `request`, `outcome` (success, error)
pub fn record_request_duration(request: &str, outcome: &str, duration: Duration) {
    histogram!(
        "mg_request_duration_seconds",
        "request" => request.to_string(),
        "outcome" => outcome.to_string()
    )
    .record(duration.as_secs_f64());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::DebuggingRecorder;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_meetings_active(3);
        set_connections_active(0);
        record_admission("pending");
        record_producer_created("video");
        record_event_dropped("userJoined");
        record_actor_panic("meeting");
        record_request_duration("joinMeeting", "success", Duration::from_millis(2));
    }

    #[test]
    fn test_metric_names() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_meetings_active(2);
            set_connections_active(5);
            record_admission("accepted");
            record_producer_created("audio");
            record_event_dropped("newProducers");
            record_actor_panic("connection");
            record_request_duration("produce", "error", Duration::from_millis(7));
        });

        let mut names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();
        names.sort();
        names.dedup();

        assert_eq!(
            names,
            vec![
                "mg_actor_panics_total",
                "mg_admissions_total",
                "mg_connections_active",
                "mg_events_dropped_total",
                "mg_meetings_active",
                "mg_producers_created_total",
                "mg_request_duration_seconds",
            ]
        );
    }
}
