//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Outbound payload does not fit in a single frame
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// USB vendor or product identifier could not be parsed
    #[error("Invalid USB identifier '{input}': {reason}")]
    InvalidUsbId { input: String, reason: String },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
