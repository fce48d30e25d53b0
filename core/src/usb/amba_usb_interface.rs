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
use std::time::Duration;
use log::trace;
use nusb::Interface;
use nusb::transfer::{Control, ControlType, Recipient, RequestBuffer, TransferError};
use tokio::runtime::{Builder, Runtime};
use crate::usb::errors::TransportError;
use crate::usb::requests::Direction;
use crate::usb::transport::{ControlRequest, UsbTransport};

fn to_transport_error(error: TransferError) -> TransportError {
    match error {
        // blocking control transfers report an expired timeout as a cancellation
        TransferError::Cancelled => TransportError::Timeout,
        TransferError::Disconnected => TransportError::Disconnected,
        TransferError::Stall => TransportError::Stall,
        other => TransportError::Other(other.to_string()),
    }
}

/// [`UsbTransport`] over a claimed `nusb` interface.
///
/// Bulk reads are driven by a private single-threaded runtime, so methods of
/// this type must not be called from inside an async task. Dropping it is
/// fine anywhere.
pub struct AmbaUsbInterface {
    interface: Interface,
    runtime: Option<Runtime>,
}

impl AmbaUsbInterface {
    pub fn new(interface: Interface) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        Ok(Self {
            interface,
            runtime: Some(runtime),
        })
    }
}

impl Drop for AmbaUsbInterface {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl UsbTransport for AmbaUsbInterface {
    fn send_control(&self, request: ControlRequest, data: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let control = Control {
            control_type: ControlType::Class,
            recipient: Recipient::Interface,
            request: request.request,
            value: request.value,
            index: request.index,
        };
        trace!("control {:?} request {:#04x} value {:#06x} length {}", request.direction, request.request, request.value, data.len());
        match request.direction {
            Direction::Out => self.interface.control_out_blocking(control, data, timeout),
            Direction::In => self.interface.control_in_blocking(control, data, timeout),
        }
        .map_err(to_transport_error)
    }

    fn bulk_in(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let runtime = self.runtime.as_ref().ok_or(TransportError::Disconnected)?;
        let transfer = self.interface.bulk_in(endpoint, RequestBuffer::new(buffer.len()));
        // dropping the transfer future on timeout cancels the pending URB
        let completion = runtime.block_on(async { tokio::time::timeout(timeout, transfer).await })
                                .map_err(|_| TransportError::Timeout)?;
        let data = completion.into_result().map_err(to_transport_error)?;
        let length = data.len().min(buffer.len());
        buffer[..length].copy_from_slice(&data[..length]);
        Ok(length)
    }
}
