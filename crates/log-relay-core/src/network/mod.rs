//! Network layer for the log relay.
//!
//! This module provides:
//! - TCP listener for accepting upstream log producers
//! - Connection handler running the per-line relay pipeline

pub mod connection;
pub mod listener;

pub use connection::ConnectionHandler;
pub use listener::RelayListener;
