//! Waypoint - durable step-replay engine
//!
//! Wires the engine crates together: configuration loading and the demo
//! flow run by the `waypoint` binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Application configuration
pub mod config;

/// Demo expense approval flow
pub mod demo;

pub use config::{AppConfig, StoreConfig};
