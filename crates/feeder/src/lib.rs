//! USB watchdog heartbeat feeder
//!
//! Keeps a HID-class USB watchdog module from expiring by re-arming its
//! timer once per second. If the host hangs the heartbeats stop and the
//! module resets the machine.
//!
//! - [`usb`] finds, claims and talks to the module
//! - [`driver`] runs the connect/heartbeat/reconnect loop
//! - [`config`] merges config files and command-line options
//! - [`service`] reports progress to systemd

pub mod config;
pub mod driver;
pub mod indicator;
pub mod service;
pub mod testing;
pub mod usb;

pub use config::{CliOverrides, FeederConfig, normalize_timer};
pub use driver::{ConnectionState, HeartbeatDriver, Pacer};
pub use indicator::HeartbeatIndicator;
pub use usb::{RusbTransport, SessionError, Transport};
