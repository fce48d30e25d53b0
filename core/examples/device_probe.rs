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

use amba_core::usb::{is_amba_device, open_amba_binding};
use amba_core::usb::amba_device::DeviceSession;
use amba_core::{AmbaConfig, SessionId};
use nusb::list_devices;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = AmbaConfig::default();

    for device in list_devices()?.filter(is_amba_device) {
        println!("Amba encoder found: \"{}\" ({:04X}:{:04X})",
                 device.product_string().unwrap_or("Unknown"),
                 device.vendor_id(),
                 device.product_id());

        let binding = match open_amba_binding(&device) {
            Ok(binding) => binding,
            Err(e) => {
                println!("Device omitted: {}", e);
                continue;
            }
        };
        println!("Bulk IN endpoint: {:#04x}", binding.bulk_in_endpoint());

        let session = DeviceSession::new(SessionId(0), binding);
        let report = session.initialize(&config)?;
        if let Some(chip) = &report.chip_version {
            println!("Chip version: {}", chip);
        }
        if let Some(firmware) = &report.firmware_version {
            println!("Firmware version: {}", firmware);
        }
        if !report.failed_steps.is_empty() {
            println!("Rejected bring-up steps: {:?}", report.failed_steps);
        }
        println!("Applied configuration: {:?}", session.snapshot());
    }
    Ok(())
}
