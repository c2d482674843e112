//! Media Engine contract for the Waitroom meeting gateway.
//!
//! The gateway never touches RTP, ICE or DTLS itself. Everything below the
//! signaling layer is delegated to a Media Engine reached through the traits
//! in [`engine`]:
//!
//! ```text
//! MediaWorker ──create_router──▶ Router ──create_webrtc_transport──▶ Transport
//!                                                                     ├── produce ──▶ Producer
//!                                                                     └── consume ──▶ Consumer
//! ```
//!
//! Objects report engine-initiated closure (owning transport gone, upstream
//! producer gone) through hooks registered once at creation time.
//!
//! [`local`] provides an in-process engine that tracks objects and their close
//! cascades without forwarding packets. It backs signaling-only deployments
//! and the test suites.

#![warn(clippy::pedantic)]

pub mod engine;
pub mod error;
pub mod local;
pub mod types;

pub use engine::{CloseHook, Consumer, MediaWorker, Producer, Router, Transport};
pub use error::MediaError;
pub use local::{LocalWorker, LocalWorkerSettings};
pub use types::*;
