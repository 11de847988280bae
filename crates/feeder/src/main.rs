//! usb-watchdog
//!
//! Feeds a HID-class USB watchdog module from a Linux host. Runs until
//! interrupted, reconnecting to the module whenever it goes away.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{ShutdownSignal, log_level_for, setup_logging};
use feeder::config::{CliOverrides, FeederConfig, normalize_timer};
use feeder::{HeartbeatDriver, HeartbeatIndicator, RusbTransport, service};
use protocol::parse_usb_id;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Exit status when a second interrupt abandons cleanup
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "usb-watchdog")]
#[command(
    author,
    version,
    about = "Software interface for HID-class USB hardware watchdog modules"
)]
#[command(after_help = "
If you don't specify a value a 180 second (3 minute) timer is assumed. Unless
you have timed your computer's boot after an unclean shutdown, do not shorten
that value.

Heartbeats are sent every second, confirmed by the blinking word
\"Heartbeating\". If that word stops, so have the heartbeats.

CONFIGURATION:
    Without --config, settings are read from these files, later ones
    overriding earlier ones:
    1. /etc/usb-watchdog/config.toml
    2. ~/.config/usb-watchdog/config.toml
    Command-line options override both.
")]
struct Args {
    /// Watchdog timer value in seconds
    #[arg(allow_negative_numbers = true)]
    timer: Option<i64>,

    /// Silences all output except errors
    #[arg(short, long)]
    quiet: bool,

    /// Do not warn about timer values under 120 seconds
    #[arg(short, long)]
    nowarn: bool,

    /// Output verbose debugging information
    #[arg(short, long)]
    debug: bool,

    /// USB vendor ID like 0x5131
    #[arg(short = 'u', long, value_name = "0x____", value_parser = parse_usb_id)]
    usbvendor: Option<u16>,

    /// USB product ID like 0x2007
    #[arg(short = 'p', long, value_name = "0x____", value_parser = parse_usb_id)]
    usbproduct: Option<u16>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save the effective configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            timer: self.timer,
            vendor_id: self.usbvendor,
            product_id: self.usbproduct,
            quiet: self.quiet,
            nowarn: self.nowarn,
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", fatal_message(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

/// Line printed to stderr for anything that ends the process abnormally
fn fatal_message(message: &str) -> String {
    format!("\nFATAL ERROR: {}", message)
}

async fn run(args: Args) -> Result<ExitCode> {
    let loaded =
        FeederConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let config = loaded.config.with_overrides(&args.overrides());

    // Handle --save-config before anything touches the bus
    if args.save_config {
        let path = FeederConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    setup_logging(log_level_for(config.output.quiet, config.output.debug))
        .context("Failed to setup logging")?;

    debug!("usb-watchdog v{}", env!("CARGO_PKG_VERSION"));
    for path in &loaded.sources {
        debug!("Loaded configuration from: {}", path.display());
    }
    for (path, reason) in &loaded.skipped {
        warn!("Ignoring configuration file {}: {}", path.display(), reason);
    }

    let transport = RusbTransport::new()
        .map_err(|e| anyhow!("USB access is unavailable on this system: {}", e))?;

    if args.list_devices {
        return list_devices_mode(&transport).map(|()| ExitCode::SUCCESS);
    }

    let timer = normalize_timer(config.watchdog.timer, config.suppress_short_timer_warning());
    let identity = config.identity();
    let indicator = if config.output.quiet {
        HeartbeatIndicator::disabled()
    } else {
        HeartbeatIndicator::stdout()
    };

    let shutdown = ShutdownSignal::new();
    let (done_tx, mut done_rx) = oneshot::channel();
    let pacer = shutdown.clone();

    // USB calls block, so the driver gets its own thread
    let heartbeat = std::thread::Builder::new()
        .name("heartbeat".to_string())
        .spawn(move || {
            let mut driver = HeartbeatDriver::new(transport, pacer, identity, timer, indicator);
            driver.run();
            let _ = done_tx.send(());
        })
        .context("Failed to spawn heartbeat thread")?;

    if service::is_systemd() {
        info!("Running under systemd");
    }
    if let Err(e) = service::notify_ready() {
        warn!("Failed to notify systemd ready: {:#}", e);
    }

    let mut terminate =
        unix_signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    let mut driver_done = false;
    let code = tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            eprintln!("{}", fatal_message("User pressed CTRL+C, aborting..."));
            ExitCode::FAILURE
        }
        _ = terminate.recv() => {
            info!("Received SIGTERM, shutting down...");
            ExitCode::SUCCESS
        }
        _ = &mut done_rx => {
            error!("Heartbeat driver stopped unexpectedly");
            driver_done = true;
            ExitCode::FAILURE
        }
    };

    if let Err(e) = service::notify_stopping() {
        debug!("Failed to notify systemd stopping: {:#}", e);
    }
    shutdown.trigger();

    // Let the driver release the module; a second interrupt abandons that
    if !driver_done {
        tokio::select! {
            _ = &mut done_rx => {}
            _ = signal::ctrl_c() => {
                eprintln!("\nInterrupted again, abandoning USB cleanup");
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
        }
    }

    if heartbeat.join().is_err() {
        return Err(anyhow!("Heartbeat thread panicked"));
    }

    info!("Closing down");
    Ok(code)
}

/// List USB devices and exit
fn list_devices_mode(transport: &RusbTransport) -> Result<()> {
    let devices = transport
        .list_devices()
        .context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
    } else {
        println!("Found {} USB device(s):\n", devices.len());
        for device in devices {
            println!("  {}", device);
        }
    }

    Ok(())
}
