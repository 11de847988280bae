//! Systemd service integration
//!
//! Speaks the sd-notify protocol so the feeder can run as a `Type=notify`
//! unit and show its connection state in `systemctl status`. Outside
//! systemd every call is a no-op.

use anyhow::{Context, Result};
use std::env;
use std::os::unix::net::UnixDatagram;
use tracing::debug;

/// Send one sd-notify datagram, if systemd is listening
fn send(message: &str) -> Result<bool> {
    let Ok(socket_path) = env::var("NOTIFY_SOCKET") else {
        return Ok(false);
    };

    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(message.as_bytes(), &socket_path)
        .with_context(|| format!("Failed to send {} notification to systemd", message))?;
    Ok(true)
}

/// Notify systemd that start-up is complete
pub fn notify_ready() -> Result<()> {
    if send("READY=1")? {
        debug!("Notified systemd: service ready");
    } else {
        debug!("NOTIFY_SOCKET not set, skipping systemd notification");
    }
    Ok(())
}

/// Notify systemd that shutdown has begun
pub fn notify_stopping() -> Result<()> {
    if send("STOPPING=1")? {
        debug!("Notified systemd: service stopping");
    }
    Ok(())
}

/// Set the free-form status shown by `systemctl status`
pub fn notify_status(status: &str) -> Result<()> {
    if send(&format!("STATUS={}", status))? {
        debug!("Notified systemd: status = {}", status);
    }
    Ok(())
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}
