//! Actor model for the Meeting Gateway.
//!
//! Hierarchy:
//!
//! ```text
//! GatewayActor (singleton)
//! ├── MeetingActor (one per meeting: Session + Pending Pool)
//! └── ConnectionActor (one per signaling connection)
//! ```
//!
//! Every actor runs its own message loop and is cancelled through a child of
//! the gateway's root `CancellationToken`.

pub mod connection;
pub mod gateway;
pub mod meeting;
pub mod messages;
pub mod metrics;

pub use connection::{ConnectionActor, ConnectionActorHandle, EventSender};
pub use gateway::{GatewayActor, GatewayActorHandle, EVENT_CHANNEL_CAPACITY};
pub use meeting::{MeetingActor, MeetingActorHandle};
pub use messages::{
    ClientRequest, GatewayStatus, MeetingState, Placement, Response, RoutingStatus, ServerEvent,
};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
