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
use crate::device_manager::SessionHandle;
use crate::usb::errors::AmbaError;

/// Upper bound of a single bulk read regardless of what the caller asks for.
pub const MAX_STREAM_TRANSFER: usize = 128 * 1024;

pub const BULK_TIMEOUT: Duration = Duration::from_millis(5000);

impl SessionHandle {
    /// One bulk transfer of at most `min(max_len, MAX_STREAM_TRANSFER)` bytes.
    fn read_staged(&self, max_len: usize) -> Result<Vec<u8>, AmbaError> {
        let length = max_len.min(MAX_STREAM_TRANSFER);
        let mut staging = Vec::new();
        staging.try_reserve_exact(length)
               .map_err(|e| AmbaError::ResourceExhausted(format!("stream buffer of {} bytes: {}", length, e)))?;
        staging.resize(length, 0);

        let received = self.session().with_binding(|binding| {
            binding.transport()
                   .bulk_in(binding.bulk_in_endpoint(), &mut staging, BULK_TIMEOUT)
                   .map_err(AmbaError::from)
        })?;
        trace!("Session {}: bulk read {} of {} bytes", self.id(), received, length);
        staging.truncate(received.min(length));
        Ok(staging)
    }

    /// Reads one bulk transfer of encoded video into `buffer`.
    ///
    /// At most `min(max_len, MAX_STREAM_TRANSFER, buffer.len())` bytes are
    /// requested. Returns the number of bytes the device delivered, which may
    /// be fewer, or zero. `buffer` is left untouched on error.
    ///
    /// Blocks for up to [`BULK_TIMEOUT`]. Call it from a plain thread or
    /// `spawn_blocking`; the USB transport panics inside an async task.
    pub fn read_into(&self, buffer: &mut [u8], max_len: usize) -> Result<usize, AmbaError> {
        let data = self.read_staged(max_len.min(buffer.len()))?;
        buffer[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    /// Reads one bulk transfer of at most `max_len` bytes into a new buffer.
    ///
    /// Blocking, with the same calling context rules as [`Self::read_into`].
    pub fn read_stream(&self, max_len: usize) -> Result<Vec<u8>, AmbaError> {
        self.read_staged(max_len)
    }
}

/// Blocking reads, not usable from inside an async task.
impl io::Read for SessionHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let max_len = buf.len();
        self.read_into(buf, max_len).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Arc;
    use std::thread;
    use crate::control::{start_encode, stop_encode};
    use crate::device_manager::{DeviceRegistry, SessionRegistry};
    use crate::usb::amba_device::DeviceBinding;
    use crate::usb::errors::TransportError;
    use crate::usb::mock_transport::MockTransport;

    fn open_session(endpoint: u8) -> (DeviceRegistry, SessionHandle, std::sync::Arc<MockTransport>) {
        let registry = DeviceRegistry::default();
        let mock = MockTransport::healthy();
        let id = registry.on_arrival(DeviceBinding::new(mock.clone(), endpoint)).unwrap();
        let handle = registry.open(id).unwrap();
        (registry, handle, mock)
    }

    #[test]
    fn read_never_requests_more_than_the_transfer_cap() {
        let (_registry, handle, mock) = open_session(0x81);
        mock.push_bulk(Ok(vec![0xAB; 1024]));

        let data = handle.read_stream(1 << 20).unwrap();

        assert_eq!(data.len(), 1024);
        assert_eq!(mock.bulk_requests(), vec![(0x81, MAX_STREAM_TRANSFER, BULK_TIMEOUT)]);
    }

    #[test]
    fn read_never_returns_more_than_max_len() {
        let (_registry, handle, mock) = open_session(0x82);
        mock.push_bulk(Ok(vec![7; 4096]));

        let data = handle.read_stream(100).unwrap();

        assert_eq!(data, vec![7; 100]);
        assert_eq!(mock.bulk_requests()[0].0, 0x82);
        assert_eq!(mock.bulk_requests()[0].1, 100);
    }

    #[test]
    fn short_read_is_success() {
        let (_registry, handle, mock) = open_session(0x81);
        mock.push_bulk(Ok(vec![1, 2, 3]));
        let mut buffer = [0u8; 16];

        let received = handle.read_into(&mut buffer, 16).unwrap();

        assert_eq!(received, 3);
        assert_eq!(&buffer[..3], &[1, 2, 3]);
    }

    #[test]
    fn capture_session_streams_then_stops() {
        let (registry, handle, mock) = open_session(0x81);
        mock.push_bulk(Ok(vec![0x11; 32768]));
        mock.push_bulk(Ok(vec![0x22; 65536]));
        mock.push_bulk(Ok(Vec::new()));

        start_encode(&handle).unwrap();
        assert_eq!(handle.read_stream(65536).unwrap().len(), 32768);
        assert_eq!(handle.read_stream(65536).unwrap().len(), 65536);
        assert!(handle.read_stream(65536).unwrap().is_empty());
        stop_encode(&handle).unwrap();
        let id = handle.id();
        registry.close(handle);

        let values: Vec<u16> = mock.control_calls().iter().rev().take(2).map(|call| call.request.value).collect();
        assert_eq!(values, vec![0x0800, 0x0700]);
        assert!(mock.bulk_requests().iter().all(|request| request.1 == 65536));
        assert!(registry.open(id).is_ok());
    }

    #[test]
    fn transfers_of_one_session_never_overlap() {
        let registry = Arc::new(DeviceRegistry::default());
        let mock = MockTransport::healthy();
        mock.set_bulk_delay(Duration::from_millis(20));
        let id = registry.on_arrival(DeviceBinding::new(mock.clone(), 0x81)).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = registry.open(id).unwrap();
                thread::spawn(move || {
                    for _ in 0..3 {
                        handle.read_stream(512).unwrap();
                    }
                })
            })
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(mock.bulk_requests().len(), 12);
        assert_eq!(mock.max_bulk_in_flight(), 1);
    }

    #[test]
    fn removal_during_a_read_waits_for_the_transfer_to_finish() {
        let registry = DeviceRegistry::default();
        let mock = MockTransport::healthy();
        mock.set_bulk_delay(Duration::from_millis(100));
        mock.push_bulk(Ok(vec![0x33; 256]));
        let id = registry.on_arrival(DeviceBinding::new(mock.clone(), 0x81)).unwrap();
        let handle = registry.open(id).unwrap();

        let reader = thread::spawn(move || {
            let result = handle.read_stream(512);
            (result, handle)
        });
        while mock.bulk_in_flight() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(registry.on_removal(id));
        assert_eq!(mock.bulk_completed(), 1);

        let (result, handle) = reader.join().unwrap();
        assert_eq!(result.unwrap(), vec![0x33; 256]);
        assert!(matches!(handle.read_stream(512), Err(AmbaError::DeviceGone)));
        assert_eq!(mock.bulk_requests().len(), 1);
    }

    #[test]
    fn read_timeout_surfaces_as_timeout() {
        let (_registry, handle, mock) = open_session(0x81);
        mock.push_bulk(Err(TransportError::Timeout));

        assert!(matches!(handle.read_stream(512), Err(AmbaError::Timeout)));
    }

    #[test]
    fn failed_read_leaves_the_buffer_untouched() {
        let (_registry, handle, mock) = open_session(0x81);
        mock.push_bulk(Err(TransportError::Stall));
        let mut buffer = [0x5Au8; 8];

        assert!(matches!(handle.read_into(&mut buffer, 8), Err(AmbaError::Transfer(_))));
        assert_eq!(buffer, [0x5A; 8]);
    }

    #[test]
    fn read_after_removal_is_device_gone() {
        let (registry, mut handle, mock) = open_session(0x81);
        registry.on_removal(handle.id());
        let mut buffer = [0u8; 64];

        assert!(matches!(handle.read_stream(64), Err(AmbaError::DeviceGone)));
        assert_eq!(handle.read(&mut buffer).unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert!(mock.bulk_requests().is_empty());
    }
}
