//! Fixed-size 64-byte frames
//!
//! Outbound frames are right-padded with zero bytes. A healthy module answers
//! every frame with an identical copy of it.

use crate::error::{ProtocolError, Result};
use std::fmt::Write;

/// Size of every transfer, in both directions
pub const FRAME_SIZE: usize = 64;

/// A single outbound frame, always exactly [`FRAME_SIZE`] bytes
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_SIZE]);

impl Frame {
    /// Pad `payload` with zero bytes up to [`FRAME_SIZE`]
    pub fn pad(payload: &[u8]) -> Result<Self> {
        if payload.len() > FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: FRAME_SIZE,
            });
        }

        let mut buffer = [0u8; FRAME_SIZE];
        buffer[..payload.len()].copy_from_slice(payload);
        Ok(Self(buffer))
    }

    /// Frame carrying a single command byte
    pub fn command(command: u8) -> Self {
        let mut buffer = [0u8; FRAME_SIZE];
        buffer[0] = command;
        Self(buffer)
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }

    /// Whether `response` is a byte-for-byte echo of this frame
    pub fn matches(&self, response: &[u8]) -> bool {
        response == self.0.as_slice()
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame(0x{})", self.to_hex())
    }
}

/// Lowercase hex encoding, two digits per byte, no prefix
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing to a String cannot fail
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_single_byte() {
        let frame = Frame::pad(&[0x0C]).unwrap();
        assert_eq!(frame.as_bytes().len(), FRAME_SIZE);
        assert_eq!(frame.as_bytes()[0], 0x0C);
        assert!(frame.as_bytes()[1..].iter().all(|b| *b == 0));
        assert_eq!(frame, Frame::command(0x0C));
    }

    #[test]
    fn test_pad_full_frame_is_unchanged() {
        let payload = [0xAAu8; FRAME_SIZE];
        let frame = Frame::pad(&payload).unwrap();
        assert_eq!(frame.as_bytes(), &payload);
    }

    #[test]
    fn test_pad_rejects_oversized_payload() {
        let payload = [0u8; FRAME_SIZE + 1];
        assert_eq!(
            Frame::pad(&payload),
            Err(ProtocolError::FrameTooLarge { size: 65, max: 64 })
        );
    }

    #[test]
    fn test_matches_requires_exact_echo() {
        let frame = Frame::command(0x12);
        let mut echo = *frame.as_bytes();
        assert!(frame.matches(&echo));

        echo[63] = 0x01;
        assert!(!frame.matches(&echo));

        // Short replies never match
        assert!(!frame.matches(&frame.as_bytes()[..32]));
        assert!(!frame.matches(&[]));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[]), "");
        assert_eq!(to_hex(&[0x00, 0x0c, 0xff]), "000cff");

        let hex = Frame::command(0x12).to_hex();
        assert_eq!(hex.len(), FRAME_SIZE * 2);
        assert!(hex.starts_with("12"));
        assert!(hex[2..].chars().all(|c| c == '0'));
    }

    #[test]
    fn test_debug_format() {
        let debug = format!("{:?}", Frame::command(0x0C));
        assert!(debug.starts_with("Frame(0x0c"));
    }
}
