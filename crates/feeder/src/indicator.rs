//! Console heartbeat indicator
//!
//! A single status line that flips between a label and blank padding of the
//! same width once per heartbeat, overwriting itself with a carriage return.

use std::io::{self, Write};
use tracing::debug;

const LABEL: &str = "\rHeartbeating!  ";
const BLANK: &str = "\r               ";

pub struct HeartbeatIndicator {
    writer: Option<Box<dyn Write + Send>>,
    visible: bool,
}

impl HeartbeatIndicator {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Some(writer),
            visible: false,
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Indicator for quiet mode; every call is a no-op
    pub fn disabled() -> Self {
        Self {
            writer: None,
            visible: false,
        }
    }

    pub fn tick(&mut self) {
        self.visible = !self.visible;
        let text = if self.visible { LABEL } else { BLANK };
        self.draw(text);
    }

    /// Blank the line if the label is currently shown
    pub fn clear(&mut self) {
        if self.visible {
            self.visible = false;
            self.draw(BLANK);
        }
    }

    fn draw(&mut self, text: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        // A closed console must not stop the heartbeat
        if let Err(e) = writer.write_all(text.as_bytes()).and_then(|()| writer.flush()) {
            debug!("Could not draw heartbeat indicator: {}", e);
        }
    }
}
