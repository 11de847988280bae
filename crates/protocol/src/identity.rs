//! USB device identity

use crate::error::{ProtocolError, Result};
use std::fmt;

/// Vendor ID of the common HID watchdog modules
pub const DEFAULT_VENDOR_ID: u16 = 0x5131;
/// Product ID of the common HID watchdog modules
pub const DEFAULT_PRODUCT_ID: u16 = 0x2007;

/// Vendor/product pair used to find the watchdog module on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Parse a USB vendor or product ID
///
/// `0x`/`0X`-prefixed input is hexadecimal, anything else decimal.
pub fn parse_usb_id(input: &str) -> Result<u16> {
    let trimmed = input.trim();
    let invalid = |reason: &str| ProtocolError::InvalidUsbId {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let (digits, radix) = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (trimmed, 10),
    };

    if digits.is_empty() {
        return Err(invalid("no digits"));
    }
    if digits.starts_with(['+', '-']) {
        return Err(invalid("sign not allowed"));
    }

    u16::from_str_radix(digits, radix).map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow => invalid("larger than 0xffff"),
        _ if radix == 16 => invalid("not a valid hex number"),
        _ => invalid("not a valid decimal number"),
    })
}
