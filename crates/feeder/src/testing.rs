//! Scripted stand-ins for the bus and the clock
//!
//! Lets the heartbeat driver run against a device whose behaviour is
//! written out in advance, with pauses that return immediately and a
//! fixed budget after which the run is cancelled.

use crate::driver::{Cancelled, Pacer};
use crate::usb::{SessionError, Transport, map_comm_error};
use protocol::{DeviceIdentity, FRAME_SIZE, Frame};
use std::collections::VecDeque;
use std::time::Duration;

/// How the scripted module answers one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Echo the padded frame back
    Echo,
    /// Answer with a full frame of 0xff
    Garbage,
    /// Answer with fewer bytes than a frame
    Short,
    /// Fail the transfer
    Fail(rusb::Error),
}

/// Session handed out by [`ScriptedTransport`]
#[derive(Debug)]
pub struct ScriptedSession {
    replies: VecDeque<Reply>,
}

#[derive(Debug)]
enum OpenStep {
    Fail(SessionError),
    Connect(Vec<Reply>),
}

/// Transport that replays a fixed sequence of open results
///
/// Once the script runs out every further `open` fails with
/// [`SessionError::NotFound`]. A connected session answers from its reply
/// list and echoes once the list is exhausted.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: VecDeque<OpenStep>,
    sent: Vec<Vec<u8>>,
    opened: Vec<DeviceIdentity>,
    open_attempts: usize,
    closed: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(mut self, err: SessionError) -> Self {
        self.script.push_back(OpenStep::Fail(err));
        self
    }

    pub fn connect(mut self, replies: Vec<Reply>) -> Self {
        self.script.push_back(OpenStep::Connect(replies));
        self
    }

    /// Every frame written, padded, in order
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// First byte of every frame written
    pub fn sent_commands(&self) -> Vec<u8> {
        self.sent.iter().map(|frame| frame[0]).collect()
    }

    /// Identities of successful opens
    pub fn opened(&self) -> &[DeviceIdentity] {
        &self.opened
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts
    }

    pub fn closed(&self) -> usize {
        self.closed
    }
}

impl Transport for ScriptedTransport {
    type Session = ScriptedSession;

    fn open(&mut self, identity: &DeviceIdentity) -> Result<ScriptedSession, SessionError> {
        self.open_attempts += 1;

        match self.script.pop_front() {
            Some(OpenStep::Connect(replies)) => {
                self.opened.push(*identity);
                Ok(ScriptedSession {
                    replies: replies.into(),
                })
            }
            Some(OpenStep::Fail(err)) => Err(err),
            None => Err(SessionError::NotFound),
        }
    }

    fn exchange(
        &mut self,
        session: &mut ScriptedSession,
        payload: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let frame = Frame::pad(payload)?;
        self.sent.push(frame.as_bytes().to_vec());

        match session.replies.pop_front().unwrap_or(Reply::Echo) {
            Reply::Echo => Ok(frame.as_bytes().to_vec()),
            Reply::Garbage => Ok(vec![0xff; FRAME_SIZE]),
            Reply::Short => Ok(frame.as_bytes()[..8].to_vec()),
            Reply::Fail(err) => Err(map_comm_error(err)),
        }
    }

    fn close(&mut self, _session: ScriptedSession) {
        self.closed += 1;
    }
}

/// Pacer that records pauses instead of sleeping
///
/// The first `budget` pauses succeed; the next one cancels the run.
#[derive(Debug, Default)]
pub struct ScriptedPacer {
    budget: usize,
    pauses: Vec<Duration>,
    cancelled: bool,
}

impl ScriptedPacer {
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    /// Pacer that is cancelled before the run starts
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    /// Every pause requested, including the one that was cancelled
    pub fn pauses(&self) -> &[Duration] {
        &self.pauses
    }
}

impl Pacer for ScriptedPacer {
    fn pause(&mut self, duration: Duration) -> Result<(), Cancelled> {
        if self.cancelled {
            return Err(Cancelled);
        }

        self.pauses.push(duration);
        if self.pauses.len() > self.budget {
            self.cancelled = true;
            return Err(Cancelled);
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
