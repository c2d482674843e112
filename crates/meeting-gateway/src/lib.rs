//! Meeting Gateway (MG) Library
//!
//! Signaling and admission-control core of the Waitroom meeting service:
//!
//! - Hosts create meetings; every meeting pairs a Session (the room) with a
//!   Pending Pool (the waiting area)
//! - Hosts join the Session directly, guests wait in the Pending Pool until a
//!   host accepts them
//! - Admitted members negotiate media transports, producers and consumers with
//!   the Media Engine; guests only ever see hosts' media
//!
//! # Architecture
//!
//! ```text
//! GatewayActor (singleton)
//! ├── RouterAllocator (round-robin over media workers)
//! ├── MeetingActor (one per meeting)
//! │   ├── Session: Roster + routing context
//! │   └── Pending Pool: Roster
//! └── ConnectionActor (one per signaling connection)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`allocator`] - Routing-context allocation over the worker pool
//! - [`config`] - Service configuration from environment
//! - [`endpoint`] - Per-participant media state
//! - [`errors`] - Error types with signaling error codes
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`room`] - Session and Pending Pool rosters, visibility rule
//! - [`signaling`] - WebSocket signaling surface

pub mod actors;
pub mod allocator;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod observability;
pub mod room;
pub mod signaling;
