//! Observability for the meeting client.
//!
//! The library only records through the `metrics` facade and `tracing`; the
//! embedding application installs the recorder and subscriber.
//!
//! # Privacy by Default
//!
//! Instrumented functions use `#[instrument(skip_all)]` with explicit fields.
//! Metric labels are bounded:
//! - `kind`: audio, video, screen
//! - `direction`: send, recv
//! - `method`: bounded by signaling request names
//! - `status`: success, error, timeout
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mclient_producers_active` | Gauge | `kind` | 1 while a kind is produced |
//! | `mclient_consumers_active` | Gauge | none | Open consumers |
//! | `mclient_consumers_created_total` | Counter | `kind` | Consumers created |
//! | `mclient_consumers_closed_total` | Counter | `kind` | Consumers closed |
//! | `mclient_consume_failures_total` | Counter | none | Producers skipped by reconciliation |
//! | `mclient_transports_created_total` | Counter | `direction` | Transports created |
//! | `mclient_transport_failures_total` | Counter | `direction`, `state` | Transports lost |
//! | `mclient_reconnect_attempts_total` | Counter | `direction` | Reconnection attempts |
//! | `mclient_signaling_request_duration_seconds` | Histogram | `method`, `status` | Request latency |
//! | `mclient_push_events_rejected_total` | Counter | `event` | Malformed push events |
//! | `mclient_join_duration_seconds` | Histogram | `status` | Time from join to in-call |
//! | `mclient_session_transitions_total` | Counter | `to` | Session state changes |

pub mod metrics;
