//! Metric definitions for the meeting client.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mclient_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use crate::transport::Direction;

use common::types::MediaKind;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Producers & Consumers
// ============================================================================

/// Mark a kind as produced or not.
///
/// Metric: `mclient_producers_active`
/// Labels: `kind`
pub fn set_producer_active(kind: MediaKind, active: bool) {
    gauge!("mclient_producers_active", "kind" => kind.as_str())
        .set(if active { 1.0 } else { 0.0 });
}

/// Set the number of open consumers.
///
/// Metric: `mclient_consumers_active`
pub fn set_consumers_active(count: usize) {
    // usize to f64 is exact for any realistic room size
    #[allow(clippy::cast_precision_loss)]
    gauge!("mclient_consumers_active").set(count as f64);
}

/// Metric: `mclient_consumers_created_total`
pub fn record_consumer_created(kind: MediaKind) {
    counter!("mclient_consumers_created_total", "kind" => kind.as_str()).increment(1);
}

/// Metric: `mclient_consumers_closed_total`
pub fn record_consumer_closed(kind: MediaKind) {
    counter!("mclient_consumers_closed_total", "kind" => kind.as_str()).increment(1);
}

/// Record a producer skipped by reconciliation.
///
/// Metric: `mclient_consume_failures_total`
pub fn record_consume_failure() {
    counter!("mclient_consume_failures_total").increment(1);
}

// ============================================================================
// Transports
// ============================================================================

/// Metric: `mclient_transports_created_total`
pub fn record_transport_created(direction: Direction) {
    counter!("mclient_transports_created_total", "direction" => direction.as_str())
        .increment(1);
}

/// Record a transport reaching a dead connection state.
///
/// Metric: `mclient_transport_failures_total`
/// Labels: `direction`, `state` (disconnected, failed, closed)
pub fn record_transport_failure(direction: Direction, state: &'static str) {
    counter!(
        "mclient_transport_failures_total",
        "direction" => direction.as_str(),
        "state" => state
    )
    .increment(1);
}

/// Metric: `mclient_reconnect_attempts_total`
pub fn record_reconnect_attempt(direction: Direction) {
    counter!("mclient_reconnect_attempts_total", "direction" => direction.as_str())
        .increment(1);
}

// ============================================================================
// Signaling
// ============================================================================

/// Record a signaling request.
///
/// Metric: `mclient_signaling_request_duration_seconds`
/// Labels: `method`, `status` (success, error, timeout)
pub fn record_signaling_request(method: &'static str, status: &'static str, duration: Duration) {
    histogram!(
        "mclient_signaling_request_duration_seconds",
        "method" => method,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// Record a push event dropped at the boundary.
///
/// Metric: `mclient_push_events_rejected_total`
/// Labels: `event` (unknown names collapse to `unknown`)
pub fn record_push_event_rejected(event: &str) {
    let event = match event {
        "newProducer" => "newProducer",
        "leave" => "leave",
        "remove" => "remove",
        "consumers" => "consumers",
        "newPeer" => "newPeer",
        "call" => "call",
        "answer" => "answer",
        "close" => "close",
        _ => "unknown",
    };
    counter!("mclient_push_events_rejected_total", "event" => event).increment(1);
}

// ============================================================================
// Session
// ============================================================================

/// Record how long a join took.
///
/// Metric: `mclient_join_duration_seconds`
/// Labels: `status` (success, error)
pub fn record_join_duration(status: &'static str, duration: Duration) {
    histogram!("mclient_join_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
}

/// Metric: `mclient_session_transitions_total`
/// Labels: `to` (the state entered)
pub fn record_session_transition(to: &'static str) {
    counter!("mclient_session_transitions_total", "to" => to).increment(1);
}
