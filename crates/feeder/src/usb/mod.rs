//! USB subsystem
//!
//! Turns the bus state into a 64-byte request/response channel to the
//! watchdog module, and tears that channel down again.
//!
//! - [`Transport`] is the seam the heartbeat driver talks to
//! - [`RusbTransport`] implements it on top of libusb
//! - [`device`] holds enumeration and endpoint selection

pub mod device;
pub mod session;

use protocol::{DeviceIdentity, Frame, ProtocolError, to_hex};
use thiserror::Error;
use tracing::warn;

pub use device::{Endpoint, UsbDeviceSummary, list_devices, select_endpoints};
pub use session::{DeviceSession, RusbTransport};

/// Failure while opening or talking to the watchdog module
#[derive(Debug, Error)]
pub enum SessionError {
    /// No device with the requested vendor/product ID is attached
    #[error("Watchdog module not found")]
    NotFound,

    /// The OS refused access; needs a permission fix, not a retry
    #[error("Access denied by the operating system")]
    AccessDenied,

    /// Device found but it lacks the endpoints the protocol needs
    #[error("Unsupported device: {0}")]
    ProtocolUnavailable(String),

    /// Transfer failed or timed out
    #[error("USB communication error: {0}")]
    Comm(rusb::Error),

    /// The device accepted fewer bytes than a full frame
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Invalid frame: {0}")]
    Frame(#[from] ProtocolError),
}

impl SessionError {
    pub fn is_permission(&self) -> bool {
        matches!(self, SessionError::AccessDenied)
    }
}

/// Map an rusb error raised while finding, opening or claiming the device
pub fn map_open_error(err: rusb::Error) -> SessionError {
    match err {
        rusb::Error::Access => SessionError::AccessDenied,
        rusb::Error::NotFound | rusb::Error::NoDevice => SessionError::NotFound,
        other => SessionError::Comm(other),
    }
}

/// Map an rusb error raised by a transfer on an open session
pub fn map_comm_error(err: rusb::Error) -> SessionError {
    match err {
        rusb::Error::Access => SessionError::AccessDenied,
        other => SessionError::Comm(other),
    }
}

/// Raw frame exchange with a watchdog module
///
/// Sessions are owned by the caller and handed back to [`Transport::close`]
/// exactly once.
pub trait Transport {
    type Session;

    /// Find, claim and drain the device matching `identity`
    fn open(&mut self, identity: &DeviceIdentity) -> Result<Self::Session, SessionError>;

    /// Send `payload` padded to a full frame and return the bytes read back
    fn exchange(
        &mut self,
        session: &mut Self::Session,
        payload: &[u8],
    ) -> Result<Vec<u8>, SessionError>;

    /// Release the device; never fails, every step is best-effort
    fn close(&mut self, session: Self::Session);

    /// Send a single command byte and check that the module echoed it
    ///
    /// A mismatch is logged and reported as `Ok(false)`; only transport
    /// failures are errors.
    fn verify_echo(
        &mut self,
        session: &mut Self::Session,
        command: u8,
    ) -> Result<bool, SessionError> {
        let frame = Frame::command(command);
        let response = self.exchange(session, frame.as_bytes())?;

        if frame.matches(&response) {
            Ok(true)
        } else {
            warn!(
                "Watchdog's response was unexpected. TX 0x{} RX 0x{}",
                frame.to_hex(),
                to_hex(&response)
            );
            Ok(false)
        }
    }
}
