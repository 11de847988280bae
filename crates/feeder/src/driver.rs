//! Heartbeat driver
//!
//! Keeps a watchdog module armed for as long as the process runs. Each pass
//! through the outer loop is one connection attempt; while connected the
//! driver re-arms the timer once per second. Every device-level failure is
//! absorbed here and turned into a reconnect after a fixed backoff. The
//! only way out is cancellation through the [`Pacer`].
//!
//! ```text
//! Startup ──fail──> Disconnected <──fail── Connected
//!    │                   │  ▲                  ▲
//!    └──────open ok──────┼──┼──────────────────┘
//!                        └──┘ retry every 2s
//! ```

use crate::indicator::HeartbeatIndicator;
use crate::service;
use crate::usb::{SessionError, Transport};
use common::ShutdownSignal;
use protocol::{DeviceIdentity, TimerValue};
use std::convert::Infallible;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info};

/// Backoff between connection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Pause after the safety arm, before the requested value is sent
pub const SAFETY_ARM_PAUSE: Duration = Duration::from_millis(250);

/// Interval between heartbeats while connected
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Connection state of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No attempt has finished yet
    Startup,
    /// Last attempt failed or the module went away
    Disconnected,
    /// Session open, heartbeats flowing
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Startup => write!(f, "startup"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Shutdown was requested while pausing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Source of every pause the driver takes
///
/// Pauses are the driver's only cancellation points, so an implementation
/// must return [`Cancelled`] promptly once shutdown is requested.
pub trait Pacer {
    fn pause(&mut self, duration: Duration) -> Result<(), Cancelled>;

    fn is_cancelled(&self) -> bool;
}

impl Pacer for ShutdownSignal {
    fn pause(&mut self, duration: Duration) -> Result<(), Cancelled> {
        if self.wait_timeout(duration) {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    fn is_cancelled(&self) -> bool {
        self.is_triggered()
    }
}

/// Why a connected run ended
#[derive(Debug)]
enum Interruption {
    Cancelled,
    Failed(SessionError),
}

impl From<Cancelled> for Interruption {
    fn from(_: Cancelled) -> Self {
        Interruption::Cancelled
    }
}

impl From<SessionError> for Interruption {
    fn from(err: SessionError) -> Self {
        Interruption::Failed(err)
    }
}

/// Drives one watchdog module through the connection state machine
pub struct HeartbeatDriver<T: Transport, P: Pacer> {
    transport: T,
    pacer: P,
    identity: DeviceIdentity,
    timer: TimerValue,
    indicator: HeartbeatIndicator,
    state: ConnectionState,
}

impl<T: Transport, P: Pacer> HeartbeatDriver<T, P> {
    pub fn new(
        transport: T,
        pacer: P,
        identity: DeviceIdentity,
        timer: TimerValue,
        indicator: HeartbeatIndicator,
    ) -> Self {
        Self {
            transport,
            pacer,
            identity,
            timer,
            indicator,
            state: ConnectionState::Startup,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    /// Run until the pacer reports cancellation
    ///
    /// Returns with no session open: every session is closed on the path
    /// that opened it, whether it ended in failure or cancellation.
    pub fn run(&mut self) {
        debug!(
            "Heartbeat driver started for {} with timer {}",
            self.identity, self.timer
        );

        while !self.pacer.is_cancelled() {
            match self.connect_and_feed() {
                Interruption::Cancelled => break,
                Interruption::Failed(err) => {
                    self.handle_failure(&err);
                    if self.pacer.pause(RECONNECT_DELAY).is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Heartbeat driver stopped in state {}", self.state);
    }

    fn connect_and_feed(&mut self) -> Interruption {
        let mut session = match self.transport.open(&self.identity) {
            Ok(session) => session,
            Err(err) => return err.into(),
        };

        self.set_state(ConnectionState::Connected);
        let outcome = self.feed(&mut session);

        self.transport.close(session);
        self.indicator.clear();

        match outcome {
            Ok(never) => match never {},
            Err(interruption) => interruption,
        }
    }

    /// Arm the safety timer, then the requested one, then keep it armed
    fn feed(&mut self, session: &mut T::Session) -> Result<Infallible, Interruption> {
        self.transport
            .verify_echo(session, TimerValue::SAFETY.command_byte())?;
        self.pacer.pause(SAFETY_ARM_PAUSE)?;

        info!("Setting timer value to {}.", self.timer);

        loop {
            self.transport
                .verify_echo(session, self.timer.command_byte())?;
            self.indicator.tick();
            self.pacer.pause(HEARTBEAT_INTERVAL)?;
        }
    }

    fn handle_failure(&mut self, err: &SessionError) {
        debug!("Connection attempt ended: {}", err);

        if err.is_permission() {
            error!(
                "Insufficient permissions to access the device. This is an OS problem you must correct."
            );
        }

        match self.state {
            ConnectionState::Connected => {
                error!("USB communication error or device removed.");
                info!("Waiting for watchdog module to be connected...");
            }
            ConnectionState::Startup => {
                info!("Waiting for watchdog module to be connected...");
            }
            ConnectionState::Disconnected => {}
        }

        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!("Connection state: {} -> {}", self.state, next);
        self.state = next;

        let status = match next {
            ConnectionState::Startup => "Starting".to_string(),
            ConnectionState::Disconnected => "Waiting for watchdog module".to_string(),
            ConnectionState::Connected => format!("Heartbeating, timer {}", self.timer),
        };
        if let Err(e) = service::notify_status(&status) {
            debug!("Could not report status to service manager: {:#}", e);
        }
    }
}
