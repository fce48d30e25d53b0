//! Scripted in-memory transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use crate::usb::errors::TransportError;
use crate::usb::requests::{AmbaCommand, Direction};
use crate::usb::transport::{ControlRequest, UsbTransport};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Report this many bytes transferred.
    Transferred(usize),
    /// Answer a GET with these bytes.
    Data(Vec<u8>),
    Fail(TransportError),
}

#[derive(Debug, Clone)]
pub(crate) struct ControlCall {
    pub request: ControlRequest,
    pub payload: Vec<u8>,
    pub timeout: Duration,
}

#[derive(Default)]
pub(crate) struct MockTransport {
    script: Mutex<HashMap<u16, Reply>>,
    control_calls: Mutex<Vec<ControlCall>>,
    bulk_replies: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    bulk_requests: Mutex<Vec<(u8, usize, Duration)>>,
    bulk_delay: Mutex<Duration>,
    bulk_in_flight: AtomicUsize,
    max_bulk_in_flight: AtomicUsize,
    bulk_completed: AtomicUsize,
}

impl MockTransport {
    /// A device accepting every command with the full payload length.
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, command: AmbaCommand, reply: Reply) {
        self.script.lock().unwrap().insert(command as u16, reply);
    }

    pub fn push_bulk(&self, reply: Result<Vec<u8>, TransportError>) {
        self.bulk_replies.lock().unwrap().push_back(reply);
    }

    /// Makes every bulk read take at least `delay`.
    pub fn set_bulk_delay(&self, delay: Duration) {
        *self.bulk_delay.lock().unwrap() = delay;
    }

    pub fn bulk_in_flight(&self) -> usize {
        self.bulk_in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of bulk reads observed running at the same time.
    pub fn max_bulk_in_flight(&self) -> usize {
        self.max_bulk_in_flight.load(Ordering::SeqCst)
    }

    pub fn bulk_completed(&self) -> usize {
        self.bulk_completed.load(Ordering::SeqCst)
    }

    pub fn control_calls(&self) -> Vec<ControlCall> {
        self.control_calls.lock().unwrap().clone()
    }

    /// (endpoint, requested length, timeout) of every bulk read.
    pub fn bulk_requests(&self) -> Vec<(u8, usize, Duration)> {
        self.bulk_requests.lock().unwrap().clone()
    }
}

impl UsbTransport for MockTransport {
    fn send_control(&self, request: ControlRequest, data: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let payload = match request.direction {
            Direction::Out => data.to_vec(),
            Direction::In => Vec::new(),
        };
        self.control_calls.lock().unwrap().push(ControlCall {
            request,
            payload,
            timeout,
        });
        let reply = self.script.lock().unwrap().get(&request.value).cloned();
        match reply {
            None => {
                if request.direction == Direction::In {
                    for (position, byte) in data.iter_mut().enumerate() {
                        *byte = position as u8;
                    }
                }
                Ok(data.len())
            }
            Some(Reply::Transferred(count)) => Ok(count),
            Some(Reply::Data(bytes)) => {
                let length = bytes.len().min(data.len());
                data[..length].copy_from_slice(&bytes[..length]);
                Ok(length)
            }
            Some(Reply::Fail(error)) => Err(error),
        }
    }

    fn bulk_in(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.bulk_requests.lock().unwrap().push((endpoint, buffer.len(), timeout));
        let running = self.bulk_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_bulk_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.bulk_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.bulk_completed.fetch_add(1, Ordering::SeqCst);
        self.bulk_in_flight.fetch_sub(1, Ordering::SeqCst);
        let reply = self.bulk_replies.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))?;
        let length = reply.len().min(buffer.len());
        buffer[..length].copy_from_slice(&reply[..length]);
        Ok(length)
    }
}
