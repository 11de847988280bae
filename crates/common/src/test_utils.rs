//! Test utilities for usb-watchdog
//!
//! Captures `tracing` output in memory so tests can assert on the exact log
//! lines a component emits.
//!
//! # Example
//!
//! ```
//! use common::test_utils::with_capture;
//! use tracing::Level;
//!
//! let (value, logs) = with_capture(Level::INFO, || {
//!     tracing::info!("Waiting for watchdog module to be connected...");
//!     tracing::debug!("not captured at INFO");
//!     42
//! });
//! assert_eq!(value, 42);
//! assert!(logs.contains("Waiting for watchdog module"));
//! assert!(!logs.contains("not captured"));
//! ```

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory sink for formatted log lines
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Writer handed out by [`LogCapture`]
pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// Run `f` with a thread-local subscriber capturing events up to `level`
pub fn with_capture<R>(level: Level, f: impl FnOnce() -> R) -> (R, String) {
    let capture = LogCapture::new();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    (result, capture.contents())
}

/// Number of lines in `logs` containing `needle`
pub fn count_lines(logs: &str, needle: &str) -> usize {
    logs.lines().filter(|line| line.contains(needle)).count()
}
