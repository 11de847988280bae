//! Device enumeration and endpoint selection

use super::{SessionError, map_open_error};
use protocol::DeviceIdentity;
use rusb::{Context, Device, EndpointDescriptor, TransferType, UsbContext};
use std::fmt;
use tracing::debug;

/// One endpoint of the claimed interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub address: u8,
    pub transfer_type: TransferType,
}

impl Endpoint {
    pub fn new(address: u8, transfer_type: TransferType) -> Self {
        Self {
            address,
            transfer_type,
        }
    }

    /// Bit 7 of the address set means IN (device to host)
    pub fn is_in(&self) -> bool {
        (self.address & 0x80) != 0
    }

    /// Only interrupt and bulk endpoints can carry the 64-byte frames
    fn carries_frames(&self) -> bool {
        matches!(
            self.transfer_type,
            TransferType::Interrupt | TransferType::Bulk
        )
    }
}

impl From<&EndpointDescriptor<'_>> for Endpoint {
    fn from(descriptor: &EndpointDescriptor<'_>) -> Self {
        Self::new(descriptor.address(), descriptor.transfer_type())
    }
}

/// Pick the first OUT and the first IN endpoint
pub fn select_endpoints(
    endpoints: impl IntoIterator<Item = Endpoint>,
) -> Result<(Endpoint, Endpoint), SessionError> {
    let mut endpoint_out = None;
    let mut endpoint_in = None;

    for endpoint in endpoints.into_iter().filter(Endpoint::carries_frames) {
        if endpoint.is_in() {
            endpoint_in.get_or_insert(endpoint);
        } else {
            endpoint_out.get_or_insert(endpoint);
        }
    }

    match (endpoint_out, endpoint_in) {
        (Some(out), Some(inbound)) => Ok((out, inbound)),
        (None, _) => Err(SessionError::ProtocolUnavailable(
            "interface has no OUT endpoint".to_string(),
        )),
        (_, None) => Err(SessionError::ProtocolUnavailable(
            "interface has no IN endpoint".to_string(),
        )),
    }
}

/// Find the first attached device matching `identity`
pub fn find_device(
    context: &Context,
    identity: &DeviceIdentity,
) -> Result<Device<Context>, SessionError> {
    let devices = context.devices().map_err(map_open_error)?;

    for device in devices.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!(
                    "Skipping device bus={} addr={}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                continue;
            }
        };

        if identity.matches(descriptor.vendor_id(), descriptor.product_id()) {
            return Ok(device);
        }
    }

    Err(SessionError::NotFound)
}

/// Bus position and IDs of an attached device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceSummary {
    pub bus_number: u8,
    pub device_address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for UsbDeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: ID {:04x}:{:04x}",
            self.bus_number, self.device_address, self.vendor_id, self.product_id
        )
    }
}

/// Enumerate every device on the bus
pub fn list_devices(context: &Context) -> Result<Vec<UsbDeviceSummary>, rusb::Error> {
    let devices = context.devices()?;

    let summaries = devices
        .iter()
        .filter_map(|device| {
            let descriptor = device.device_descriptor().ok()?;
            Some(UsbDeviceSummary {
                bus_number: device.bus_number(),
                device_address: device.address(),
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
            })
        })
        .collect();

    Ok(summaries)
}
