//! Claimed watchdog session on top of libusb
//!
//! Opening a session finds the module, detaches any kernel driver, selects
//! the configuration, claims the first interface and drains stale input.
//! Closing walks the same steps backwards; each step is guarded on its own
//! so one failure never skips the next.

use super::device::{Endpoint, find_device, list_devices, select_endpoints};
use super::{SessionError, Transport, UsbDeviceSummary, map_comm_error, map_open_error};
use protocol::{DeviceIdentity, FRAME_SIZE, Frame, to_hex};
use rusb::{Context, DeviceHandle, TransferType};
use std::time::Duration;
use tracing::{debug, info};

/// Frames go out on a write with the libusb-style default timeout
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Generous on purpose: tighter read timeouts produce spurious failures
/// on some hosts
const READ_TIMEOUT: Duration = Duration::from_millis(2000);

const DRAIN_READ_TIMEOUT: Duration = Duration::from_millis(10);
const DRAIN_BUFFER_SIZE: usize = 1024;
const DRAIN_MAX_READS: usize = 256;

/// Pause between releasing the interface and resetting the device
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Handle operations a claim needs
///
/// Implemented by the libusb handle; the teardown order is tested against
/// a recording handle.
trait ClaimHandle {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&self, interface: u8) -> rusb::Result<()>;
    fn active_configuration(&self) -> rusb::Result<u8>;
    fn set_active_configuration(&mut self, configuration: u8) -> rusb::Result<()>;
    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&self, interface: u8) -> rusb::Result<()>;
    fn reset(&self) -> rusb::Result<()>;
    fn write(&self, endpoint: Endpoint, data: &[u8], timeout: Duration) -> rusb::Result<usize>;
    fn read(
        &self,
        endpoint: Endpoint,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;
}

impl ClaimHandle for DeviceHandle<Context> {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        DeviceHandle::kernel_driver_active(self, interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, interface)
    }

    fn attach_kernel_driver(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, interface)
    }

    fn active_configuration(&self) -> rusb::Result<u8> {
        DeviceHandle::active_configuration(self)
    }

    fn set_active_configuration(&mut self, configuration: u8) -> rusb::Result<()> {
        DeviceHandle::set_active_configuration(self, configuration)
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, interface)
    }

    fn release_interface(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, interface)
    }

    fn reset(&self) -> rusb::Result<()> {
        DeviceHandle::reset(self)
    }

    fn write(&self, endpoint: Endpoint, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        match endpoint.transfer_type {
            TransferType::Bulk => self.write_bulk(endpoint.address, data, timeout),
            _ => self.write_interrupt(endpoint.address, data, timeout),
        }
    }

    fn read(
        &self,
        endpoint: Endpoint,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        match endpoint.transfer_type {
            TransferType::Bulk => self.read_bulk(endpoint.address, buffer, timeout),
            _ => self.read_interrupt(endpoint.address, buffer, timeout),
        }
    }
}

/// Open handle plus what we changed on it, so it can be undone
struct Claim<H: ClaimHandle> {
    handle: H,
    interface: u8,
    kernel_driver_detached: bool,
    interface_claimed: bool,
}

impl<H: ClaimHandle> Claim<H> {
    /// Claim `interface` under `configuration`
    ///
    /// On failure whatever was already changed is undone before the error
    /// is returned.
    fn establish(handle: H, interface: u8, configuration: u8) -> Result<Self, SessionError> {
        let mut claim = Self {
            handle,
            interface,
            kernel_driver_detached: false,
            interface_claimed: false,
        };

        match claim.acquire(configuration) {
            Ok(()) => Ok(claim),
            Err(e) => {
                claim.release();
                Err(e)
            }
        }
    }

    fn acquire(&mut self, configuration: u8) -> Result<(), SessionError> {
        match self.handle.kernel_driver_active(self.interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", self.interface);
                self.handle
                    .detach_kernel_driver(self.interface)
                    .map_err(map_open_error)?;
                self.kernel_driver_detached = true;
            }
            Ok(false) => debug!("Device not claimed by a kernel driver"),
            // Platforms without kernel driver control count as unclaimed
            Err(rusb::Error::NotSupported) => {
                debug!("Kernel driver detection not supported on this platform")
            }
            Err(e) => debug!("Could not check kernel driver status: {}", e),
        }

        match self.handle.active_configuration() {
            Ok(active) if active == configuration => {
                debug!("Configuration {} already active", configuration)
            }
            _ => self
                .handle
                .set_active_configuration(configuration)
                .map_err(map_open_error)?,
        }

        self.handle
            .claim_interface(self.interface)
            .map_err(map_open_error)?;
        self.interface_claimed = true;
        debug!("Claimed interface {}", self.interface);

        Ok(())
    }

    /// Undo everything `acquire` did, then reset the device
    fn release(self) {
        if self.interface_claimed {
            match self.handle.release_interface(self.interface) {
                Ok(()) => debug!("Released interface {}", self.interface),
                Err(e) => debug!("Could not release interface {}: {}", self.interface, e),
            }
        }

        if self.kernel_driver_detached {
            match self.handle.attach_kernel_driver(self.interface) {
                Ok(()) => debug!("Reattached kernel driver to interface {}", self.interface),
                Err(e) => debug!("Could not reattach kernel driver: {}", e),
            }
        }

        std::thread::sleep(SETTLE_DELAY);

        match self.handle.reset() {
            Ok(()) => debug!("Reset device"),
            Err(e) => debug!("Could not reset device: {}", e),
        }
    }
}

/// Read and discard whatever the module has queued
///
/// Stops at the first read that times out or fails, and after
/// `DRAIN_MAX_READS` reads in any case. Returns the number of reads that
/// returned data.
fn drain_input<H: ClaimHandle>(handle: &H, endpoint: Endpoint) -> usize {
    debug!("Trying to drain USB device input buffer");
    let mut buffer = [0u8; DRAIN_BUFFER_SIZE];

    for drained in 0..DRAIN_MAX_READS {
        match handle.read(endpoint, &mut buffer, DRAIN_READ_TIMEOUT) {
            Ok(len) => debug!("Drained {} bytes from USB endpoint", len),
            Err(e) => {
                debug!("Finished attempts to drain ({})", e);
                return drained;
            }
        }
    }

    debug!("Stopped draining after {} reads", DRAIN_MAX_READS);
    DRAIN_MAX_READS
}

/// One live claim of the watchdog module
pub struct DeviceSession {
    claim: Claim<DeviceHandle<Context>>,
    endpoint_out: Endpoint,
    endpoint_in: Endpoint,
    bus_number: u8,
    device_address: u8,
}

impl DeviceSession {
    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    pub fn kernel_driver_detached(&self) -> bool {
        self.claim.kernel_driver_detached
    }

    fn write(&self, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.claim.handle.write(self.endpoint_out, data, timeout)
    }

    fn read(&self, buffer: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        self.claim.handle.read(self.endpoint_in, buffer, timeout)
    }
}

/// [`Transport`] backed by a libusb context
pub struct RusbTransport {
    context: Context,
}

impl RusbTransport {
    /// Create the libusb context
    ///
    /// Fails only when libusb itself is unusable on this host.
    pub fn new() -> Result<Self, rusb::Error> {
        Ok(Self {
            context: Context::new()?,
        })
    }

    pub fn list_devices(&self) -> Result<Vec<UsbDeviceSummary>, rusb::Error> {
        list_devices(&self.context)
    }
}

impl Transport for RusbTransport {
    type Session = DeviceSession;

    fn open(&mut self, identity: &DeviceIdentity) -> Result<DeviceSession, SessionError> {
        debug!(
            "Looking for device with idVendor {:#06x}, idProduct {:#06x}",
            identity.vendor_id, identity.product_id
        );
        let device = find_device(&self.context, identity)?;
        let bus_number = device.bus_number();
        let device_address = device.address();
        debug!(
            "Watchdog module found: bus={}, addr={}, id={}",
            bus_number, device_address, identity
        );

        // The module has a single configuration; take its first interface
        let config = device.config_descriptor(0).map_err(map_open_error)?;
        let interface = config.interfaces().next().ok_or_else(|| {
            SessionError::ProtocolUnavailable("configuration has no interfaces".to_string())
        })?;
        let interface_number = interface.number();
        let setting = interface.descriptors().next().ok_or_else(|| {
            SessionError::ProtocolUnavailable("interface has no alternate settings".to_string())
        })?;
        let (endpoint_out, endpoint_in) =
            select_endpoints(setting.endpoint_descriptors().map(|e| Endpoint::from(&e)))?;
        debug!(
            "Using OUT endpoint {:#04x} and IN endpoint {:#04x}",
            endpoint_out.address, endpoint_in.address
        );

        let handle = device.open().map_err(map_open_error)?;
        let claim = Claim::establish(handle, interface_number, config.number())?;
        drain_input(&claim.handle, endpoint_in);

        let session = DeviceSession {
            claim,
            endpoint_out,
            endpoint_in,
            bus_number,
            device_address,
        };

        info!(
            "Connected to watchdog module {} on bus {} address {}",
            identity,
            session.bus_number(),
            session.device_address()
        );
        Ok(session)
    }

    fn exchange(
        &mut self,
        session: &mut DeviceSession,
        payload: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let frame = Frame::pad(payload)?;
        debug!("TX  0x{}", frame.to_hex());

        let written = session
            .write(frame.as_bytes(), WRITE_TIMEOUT)
            .map_err(map_comm_error)?;
        if written != FRAME_SIZE {
            return Err(SessionError::ShortWrite {
                written,
                expected: FRAME_SIZE,
            });
        }

        let mut buffer = [0u8; FRAME_SIZE];
        let len = session
            .read(&mut buffer, READ_TIMEOUT)
            .map_err(map_comm_error)?;
        debug!("RX  0x{}", to_hex(&buffer[..len]));

        Ok(buffer[..len].to_vec())
    }

    fn close(&mut self, session: DeviceSession) {
        debug!(
            "Closing session on bus {} address {} (kernel driver detached: {})",
            session.bus_number(),
            session.device_address(),
            session.kernel_driver_detached()
        );
        session.claim.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Instant;

    type CallLog = Rc<RefCell<Vec<(&'static str, Instant)>>>;

    /// Handle that records every call and fails the steps it is told to
    #[derive(Default)]
    struct RecordingHandle {
        calls: CallLog,
        failing: Vec<&'static str>,
        kernel_driver: Option<rusb::Result<bool>>,
        active_configuration: u8,
        /// Reads that return data before the first timeout; `None` never runs dry
        queued_reads: Option<usize>,
    }

    impl RecordingHandle {
        fn record(&self, step: &'static str) -> rusb::Result<()> {
            self.calls.borrow_mut().push((step, Instant::now()));
            if self.failing.contains(&step) {
                Err(rusb::Error::Io)
            } else {
                Ok(())
            }
        }
    }

    impl ClaimHandle for RecordingHandle {
        fn kernel_driver_active(&self, _interface: u8) -> rusb::Result<bool> {
            self.record("kernel_driver_active")?;
            self.kernel_driver.unwrap_or(Ok(false))
        }

        fn detach_kernel_driver(&mut self, _interface: u8) -> rusb::Result<()> {
            self.record("detach_kernel_driver")
        }

        fn attach_kernel_driver(&self, _interface: u8) -> rusb::Result<()> {
            self.record("attach_kernel_driver")
        }

        fn active_configuration(&self) -> rusb::Result<u8> {
            self.record("active_configuration")?;
            Ok(self.active_configuration)
        }

        fn set_active_configuration(&mut self, configuration: u8) -> rusb::Result<()> {
            self.record("set_active_configuration")?;
            self.active_configuration = configuration;
            Ok(())
        }

        fn claim_interface(&mut self, _interface: u8) -> rusb::Result<()> {
            self.record("claim_interface")
        }

        fn release_interface(&self, _interface: u8) -> rusb::Result<()> {
            self.record("release_interface")
        }

        fn reset(&self) -> rusb::Result<()> {
            self.record("reset")
        }

        fn write(
            &self,
            _endpoint: Endpoint,
            data: &[u8],
            _timeout: Duration,
        ) -> rusb::Result<usize> {
            self.record("write")?;
            Ok(data.len())
        }

        fn read(
            &self,
            _endpoint: Endpoint,
            buffer: &mut [u8],
            _timeout: Duration,
        ) -> rusb::Result<usize> {
            let reads = steps(&self.calls).iter().filter(|s| **s == "read").count();
            self.record("read")?;
            match self.queued_reads {
                Some(queued) if reads >= queued => Err(rusb::Error::Timeout),
                _ => Ok(buffer.len().min(FRAME_SIZE)),
            }
        }
    }

    fn steps(log: &CallLog) -> Vec<&'static str> {
        log.borrow().iter().map(|(step, _)| *step).collect()
    }

    fn called_at(log: &CallLog, step: &str) -> Instant {
        log.borrow()
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, at)| *at)
            .unwrap()
    }

    fn detached_handle() -> RecordingHandle {
        RecordingHandle {
            kernel_driver: Some(Ok(true)),
            ..RecordingHandle::default()
        }
    }

    fn in_endpoint() -> Endpoint {
        Endpoint::new(0x81, TransferType::Interrupt)
    }

    #[test]
    fn test_establish_detaches_and_claims() {
        let claim = Claim::establish(detached_handle(), 0, 1).unwrap();

        assert!(claim.kernel_driver_detached);
        assert!(claim.interface_claimed);
        assert_eq!(
            steps(&claim.handle.calls),
            vec![
                "kernel_driver_active",
                "detach_kernel_driver",
                "active_configuration",
                "set_active_configuration",
                "claim_interface",
            ]
        );
    }

    #[test]
    fn test_establish_keeps_active_configuration() {
        let handle = RecordingHandle {
            active_configuration: 1,
            ..RecordingHandle::default()
        };
        let claim = Claim::establish(handle, 0, 1).unwrap();

        let log = steps(&claim.handle.calls);
        assert!(!claim.kernel_driver_detached);
        assert!(!log.contains(&"set_active_configuration"));
        assert!(!log.contains(&"detach_kernel_driver"));
    }

    #[test]
    fn test_kernel_driver_query_unsupported() {
        let handle = RecordingHandle {
            kernel_driver: Some(Err(rusb::Error::NotSupported)),
            ..RecordingHandle::default()
        };
        let claim = Claim::establish(handle, 0, 1).unwrap();

        assert!(!claim.kernel_driver_detached);
        assert!(claim.interface_claimed);
    }

    #[test]
    fn test_release_reattaches_only_what_was_detached() {
        let detached = Claim::establish(detached_handle(), 0, 1).unwrap();
        let detached_log = detached.handle.calls.clone();
        detached.release();

        let untouched = Claim::establish(RecordingHandle::default(), 0, 1).unwrap();
        let untouched_log = untouched.handle.calls.clone();
        untouched.release();

        assert_eq!(
            &steps(&detached_log)[5..],
            &["release_interface", "attach_kernel_driver", "reset"]
        );
        assert_eq!(&steps(&untouched_log)[4..], &["release_interface", "reset"]);
    }

    #[test]
    fn test_release_runs_every_step_when_all_fail() {
        let claim = Claim {
            handle: RecordingHandle {
                failing: vec!["release_interface", "attach_kernel_driver", "reset"],
                ..RecordingHandle::default()
            },
            interface: 0,
            kernel_driver_detached: true,
            interface_claimed: true,
        };
        let log = claim.handle.calls.clone();

        claim.release();

        assert_eq!(
            steps(&log),
            vec!["release_interface", "attach_kernel_driver", "reset"]
        );
    }

    #[test]
    fn test_release_settles_before_reset() {
        let claim = Claim::establish(RecordingHandle::default(), 0, 1).unwrap();
        let log = claim.handle.calls.clone();

        claim.release();

        let released = called_at(&log, "release_interface");
        assert!(called_at(&log, "reset").duration_since(released) >= SETTLE_DELAY);
    }

    #[test]
    fn test_failed_claim_is_undone() {
        let handle = RecordingHandle {
            failing: vec!["claim_interface"],
            ..detached_handle()
        };
        let log = handle.calls.clone();

        let result = Claim::establish(handle, 0, 1);

        assert!(matches!(result, Err(SessionError::Comm(rusb::Error::Io))));
        // Interface never claimed, so only the kernel driver is handed back
        assert_eq!(
            &steps(&log)[4..],
            &["claim_interface", "attach_kernel_driver", "reset"]
        );
    }

    #[test]
    fn test_failed_configuration_is_undone() {
        let handle = RecordingHandle {
            failing: vec!["set_active_configuration"],
            ..RecordingHandle::default()
        };
        let log = handle.calls.clone();

        assert!(Claim::establish(handle, 0, 1).is_err());
        assert_eq!(
            steps(&log),
            vec![
                "kernel_driver_active",
                "active_configuration",
                "set_active_configuration",
                "reset",
            ]
        );
    }

    #[test]
    fn test_drain_stops_at_first_error() {
        let handle = RecordingHandle {
            queued_reads: Some(3),
            ..RecordingHandle::default()
        };

        assert_eq!(drain_input(&handle, in_endpoint()), 3);
        assert_eq!(steps(&handle.calls).len(), 4);
    }

    #[test]
    fn test_drain_gives_up_after_max_reads() {
        let handle = RecordingHandle::default();

        assert_eq!(drain_input(&handle, in_endpoint()), DRAIN_MAX_READS);
        assert_eq!(steps(&handle.calls).len(), DRAIN_MAX_READS);
    }

    #[test]
    fn test_drain_on_silent_device() {
        let handle = RecordingHandle {
            queued_reads: Some(0),
            ..RecordingHandle::default()
        };

        assert_eq!(drain_input(&handle, in_endpoint()), 0);
    }
}
