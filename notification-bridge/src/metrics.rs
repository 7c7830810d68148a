//! Prometheus metrics for the notification bridge

use lazy_static::lazy_static;
use prometheus::{register_histogram, register_int_counter_vec, Histogram, IntCounterVec};

lazy_static! {
    /// Notifications by channel ("push", "realtime") and status
    pub static ref NOTIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "notification_bridge_notifications_total",
        "Notifications sent by channel and status",
        &["channel", "status"]
    )
    .unwrap();

    /// NATS real-time publish duration
    pub static ref REALTIME_PUBLISH_DURATION: Histogram = register_histogram!(
        "notification_bridge_realtime_publish_duration_seconds",
        "Real-time publish duration in seconds"
    )
    .unwrap();
}

/// Count one notification outcome
pub fn record_notification(channel: &str, status: &str) {
    NOTIFICATIONS_TOTAL.with_label_values(&[channel, status]).inc();
}
