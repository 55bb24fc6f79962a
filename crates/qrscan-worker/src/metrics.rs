//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric names as constants for consistency.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "qrscan_messages_total";
    pub const VIDEOS_TOTAL: &str = "qrscan_videos_total";
    pub const VIDEO_PROCESSING_SECONDS: &str = "qrscan_video_processing_seconds";
    pub const NOTIFICATIONS_TOTAL: &str = "qrscan_notifications_total";
    pub const DELIVERIES_IN_FLIGHT: &str = "qrscan_deliveries_in_flight";
}

/// Install the Prometheus recorder and serve it on `port`.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Record the disposition a delivery was settled with.
pub fn record_message(disposition: &'static str) {
    counter!(names::MESSAGES_TOTAL, "disposition" => disposition).increment(1);
}

/// Record a finished processing attempt.
pub fn record_video(outcome: &'static str, duration_secs: f64) {
    counter!(names::VIDEOS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::VIDEO_PROCESSING_SECONDS, "outcome" => outcome).record(duration_secs);
}

/// Record a notification attempt's final outcome per transport.
pub fn record_notification(transport: &'static str, outcome: &'static str) {
    counter!(
        names::NOTIFICATIONS_TOTAL,
        "transport" => transport,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_in_flight(count: usize) {
    metrics::gauge!(names::DELIVERIES_IN_FLIGHT).set(count as f64);
}
