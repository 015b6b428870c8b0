//! Observability for the signal service.
//!
//! # Privacy by Default
//!
//! Session spans use `#[instrument(skip_all)]` and record only connection,
//! room and participant identifiers. SDP bodies and ICE candidates are never
//! logged above `trace`. Metric labels are bounded:
//! - `message_type`: bounded by `SignalRequest` variants (4 values)
//! - `state`: `add`, `remove`
//! - `code`: bounded by `ErrorCode` variants
//! - `outcome`: `clean`, `internal`, `unknown`, `transport`
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `signal_connections_active` | Gauge | none | Open signaling connections |
//! | `signal_messages_total` | Counter | `message_type` | Inbound messages handled |
//! | `signal_message_latency_seconds` | Histogram | `message_type` | Inbound message handling latency |
//! | `signal_stream_events_total` | Counter | `state` | Stream events broadcast |
//! | `signal_stream_events_dropped_total` | Counter | `reason` | Stream events dropped for one session (full or closed sink) |
//! | `signal_protocol_errors_total` | Counter | `code` | Error messages sent to clients |
//! | `signal_session_terminations_total` | Counter | `outcome` | Session endings by outcome |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
