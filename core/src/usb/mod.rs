// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;
use std::sync::Arc;
use log::{debug, warn};
use nusb::DeviceInfo;
use nusb::transfer::{Direction, EndpointType};
use crate::usb::amba_device::DeviceBinding;
use crate::usb::amba_usb_interface::AmbaUsbInterface;
use crate::usb::errors::DeviceDiscoveryError;

pub mod requests;
pub mod errors;
pub mod transport;
pub mod amba_device;
mod amba_usb_interface;

#[cfg(test)]
pub(crate) mod mock_transport;

pub const AMBA_VENDOR_ID: u16 = 0x4255;
pub const AMBA_PRODUCT_ID: u16 = 0x0003;

/// Used when the streaming interface does not advertise a bulk IN endpoint.
pub const DEFAULT_BULK_IN_ENDPOINT: u8 = 0x81;

const STREAMING_ALT_SETTING: u8 = 1;

pub fn is_amba_device(device_info: &DeviceInfo) -> bool {
    device_info.vendor_id() == AMBA_VENDOR_ID && device_info.product_id() == AMBA_PRODUCT_ID
}

struct StreamingInterface {
    number: u8,
    bulk_in_endpoint: Option<u8>,
}

/// The streaming interface is the one exposing more than one alternate setting.
fn find_streaming_interface(device: &nusb::Device) -> Result<StreamingInterface, DeviceDiscoveryError> {
    let configuration = device.active_configuration()
                              .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let group = configuration.interfaces()
                             .find(|group| group.alt_settings().count() > 1)
                             .ok_or(DeviceDiscoveryError::InterfaceNotFound)?;

    let mut bulk_in_endpoint = None;
    for alt in group.alt_settings() {
        if alt.alternate_setting() != STREAMING_ALT_SETTING {
            continue;
        }
        bulk_in_endpoint = alt.endpoints()
                              .find(|ep| ep.direction() == Direction::In && ep.transfer_type() == EndpointType::Bulk)
                              .map(|ep| ep.address());
    }

    Ok(StreamingInterface {
        number: group.interface_number(),
        bulk_in_endpoint,
    })
}

/// Opens an Amba encoder, selects its streaming alternate setting and
/// returns a binding ready for session bring-up.
///
/// Performs blocking USB I/O; call it from a blocking context.
pub fn open_amba_binding(device_info: &DeviceInfo) -> Result<DeviceBinding, DeviceDiscoveryError> {
    if !is_amba_device(device_info) {
        return Err(DeviceDiscoveryError::NotAmbaDevice {
            vendor_id: device_info.vendor_id(),
            product_id: device_info.product_id(),
        });
    }

    let device = device_info.open()?;
    let streaming = find_streaming_interface(&device)?;
    let interface = device.claim_interface(streaming.number)?;
    interface.set_alt_setting(STREAMING_ALT_SETTING)?;

    let bulk_in_endpoint = streaming.bulk_in_endpoint.unwrap_or_else(|| {
        warn!("No bulk IN endpoint on interface {}, using {:#04x}", streaming.number, DEFAULT_BULK_IN_ENDPOINT);
        DEFAULT_BULK_IN_ENDPOINT
    });
    debug!("Amba streaming interface {} alt {} bulk in {:#04x}", streaming.number, STREAMING_ALT_SETTING,
        bulk_in_endpoint);

    let transport = AmbaUsbInterface::new(interface)?;
    Ok(DeviceBinding::new(Arc::new(transport), bulk_in_endpoint))
}
