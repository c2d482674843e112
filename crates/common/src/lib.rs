//! Common types shared across Waitroom components.

#![warn(clippy::pedantic)]

/// Module for identifier and participant metadata types
pub mod types;
