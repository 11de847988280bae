//! Wire protocol for HID-class USB watchdog modules
//!
//! The module speaks a tiny fixed-size protocol: every transfer is exactly
//! 64 bytes in each direction, the host sends a single command byte followed
//! by zero padding, and the module echoes the frame back. The only command in
//! use arms the watchdog timer, expressed in 10-second units.
//!
//! This crate is I/O free: it only knows how to build frames, normalize timer
//! values and parse USB identifiers.
//!
//! # Example
//!
//! ```
//! use protocol::{Frame, TimerValue};
//!
//! let setting = TimerValue::from_seconds(180);
//! assert!(setting.issue.is_none());
//!
//! let frame = Frame::command(setting.value.command_byte());
//! assert_eq!(frame.as_bytes()[0], 0x12);
//! assert!(frame.as_bytes()[1..].iter().all(|b| *b == 0));
//! ```

pub mod error;
pub mod frame;
pub mod identity;
pub mod timer;

pub use error::{ProtocolError, Result};
pub use frame::{FRAME_SIZE, Frame, to_hex};
pub use identity::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID, DeviceIdentity, parse_usb_id};
pub use timer::{TimerIssue, TimerSetting, TimerValue};
