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

use std::time::Duration;
use crate::usb::errors::TransportError;
use crate::usb::requests::Direction;

/// Setup packet fields of a class control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request: u8,
    pub direction: Direction,
    pub value: u16,
    pub index: u16,
}

/// Blocking USB transfer primitives of one claimed device interface.
///
/// Calls block the calling thread until the transfer completes or `timeout`
/// expires.
pub trait UsbTransport: Send + Sync {
    /// Runs a control transfer on the default endpoint.
    ///
    /// For [`Direction::Out`] `data` is sent, for [`Direction::In`] it is
    /// filled. Returns the number of bytes actually transferred.
    fn send_control(&self, request: ControlRequest, data: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Reads at most `buffer.len()` bytes from a bulk IN endpoint.
    fn bulk_in(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}
