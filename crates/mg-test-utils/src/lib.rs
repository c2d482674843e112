//! # MG Test Utilities
//!
//! Shared test utilities for the Meeting Gateway (MG).
//!
//! This crate provides a controllable Media Engine worker and test fixtures
//! for driving the gateway end to end without a real media server.
//!
//! ## Modules
//!
//! - `mock_engine` - Media worker wrapping the in-process engine, with knobs
//!   for held or failed router allocation and rejected transport calls
//! - `fixtures` - Gateway and client fixtures plus canned client parameters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mg_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let gateway = TestGateway::new();
//!     let mut host = gateway.host("alice");
//!     host.create_and_join("standup").await;
//!
//!     let mut guest = gateway.guest("bob");
//!     guest.join("standup").await.unwrap();
//!     host.next_event().await; // userJoinedWaitingArea
//! }
//! ```
//!
//! ### Holding router allocation
//!
//! ```rust,ignore
//! let worker = MockWorker::builder().hold_router().build();
//! let gateway = TestGateway::with_worker(Arc::clone(&worker));
//!
//! // Media requests fail with "not ready" until the router is released
//! worker.release_router();
//! ```

pub mod fixtures;
pub mod mock_engine;

pub use fixtures::*;
pub use mock_engine::*;
