//! Common utilities for usb-watchdog
//!
//! This crate provides the ambient plumbing shared by the feeder binary and
//! its tests: the error type, logging setup, the shutdown signal that links
//! the async signal handler to the blocking heartbeat thread, and log
//! capture helpers for tests.

pub mod error;
pub mod logging;
pub mod shutdown;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::{log_level_for, setup_logging};
pub use shutdown::ShutdownSignal;
