//! Sender pool metrics, grounded in the teacher's `fc-router::router_metrics`
//! (same macro usage, renamed to this system's message/channel vocabulary).

use std::time::Duration;

use metrics::{counter, histogram};

pub fn record_send_attempt(channel_type: &str, success: bool, status: &str) {
    counter!(
        "courier_sends_total",
        "channel_type" => channel_type.to_string(),
        "success" => success.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_send_latency(channel_type: &str, duration: Duration) {
    histogram!(
        "courier_send_duration_seconds",
        "channel_type" => channel_type.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_circuit_open_skip(channel_type: &str) {
    counter!(
        "courier_circuit_open_skips_total",
        "channel_type" => channel_type.to_string()
    )
    .increment(1);
}
