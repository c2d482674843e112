//! Observability for the Meeting Gateway.
//!
//! All actor run loops use `#[instrument(skip_all)]` with explicit fields;
//! metric labels are bounded enums rendered as strings.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mg_meetings_active` | Gauge | none | Registered meetings |
//! | `mg_connections_active` | Gauge | none | Live signaling connections |
//! | `mg_admissions_total` | Counter | `outcome` | Joins and host admission decisions |
//! | `mg_producers_created_total` | Counter | `kind` | Published media sources |
//! | `mg_events_dropped_total` | Counter | `event` | Pushes dropped on a full client channel |
//! | `mg_actor_panics_total` | Counter | `actor_type` | Actor tasks that panicked |
//! | `mg_request_duration_seconds` | Histogram | `request`, `outcome` | Signaling request latency |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
