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

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use log::{debug, error, info, warn};
use crate::config::{AmbaConfig, BringUpStep, BringUpSteps};
use crate::definitions::{AppendHeaderFlags, EncodeFormat, VinDevice, VoutDevice};
use crate::device_manager::SessionId;
use crate::usb::errors::AmbaError;
use crate::usb::requests::{AmbaRequest, ChipVersion, Direction, EncodeSizePair, FirmwareVersion, ImageParameterBlock};
use crate::usb::transport::{ControlRequest, UsbTransport};

pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Live association of a session with the endpoints of an attached device.
#[derive(Clone)]
pub struct DeviceBinding {
    transport: Arc<dyn UsbTransport>,
    bulk_in_endpoint: u8,
}

impl DeviceBinding {
    pub fn new(transport: Arc<dyn UsbTransport>, bulk_in_endpoint: u8) -> Self {
        Self {
            transport,
            bulk_in_endpoint,
        }
    }

    pub fn transport(&self) -> &dyn UsbTransport {
        self.transport.as_ref()
    }

    pub fn bulk_in_endpoint(&self) -> u8 {
        self.bulk_in_endpoint
    }
}

/// Last configuration the device accepted. Never read back from the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub encode_format: Option<EncodeFormat>,
    pub append_header: Option<AppendHeaderFlags>,
    pub encode_size: Option<EncodeSizePair>,
    pub h264_bitrate: Option<u32>,
    pub h264_framerate: Option<u32>,
    pub vin_device: Option<VinDevice>,
    pub vout_device: Option<VoutDevice>,
    pub image_parameters: Option<ImageParameterBlock>,
}

impl ConfigSnapshot {
    fn record(&mut self, request: &AmbaRequest) {
        match *request {
            AmbaRequest::SetEncodeFormat(format) => self.encode_format = Some(format),
            AmbaRequest::SetAppendHeader(flags) => self.append_header = Some(flags),
            AmbaRequest::SetEncodeSize(sizes) => self.encode_size = Some(sizes),
            AmbaRequest::SetH264Bitrate(kbps) => self.h264_bitrate = Some(kbps),
            AmbaRequest::SetH264Framerate(fps) => self.h264_framerate = Some(fps),
            AmbaRequest::SetVinDevice(vin) => self.vin_device = Some(vin),
            AmbaRequest::SetVoutDevice(vout) => self.vout_device = Some(vout),
            AmbaRequest::SetImagePara(block) => self.image_parameters = Some(block),
            _ => (),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub transferred: usize,
    /// Bytes received from the device, empty for host-to-device commands.
    pub data: Vec<u8>,
}

/// What the device reported during bring-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BringUpReport {
    pub chip_version: Option<ChipVersion>,
    pub firmware_version: Option<FirmwareVersion>,
    /// Steps the device rejected.
    pub failed_steps: BringUpSteps,
}

pub type TeardownHook = Box<dyn Fn(SessionId) + Send + Sync>;

struct SessionIo {
    binding: Option<DeviceBinding>,
    snapshot: ConfigSnapshot,
}

/// One physical encoder for the whole time it is attached.
///
/// Every transport call runs under the I/O lock, which also guards the
/// binding, so a call either completes against a live device or observes
/// [`AmbaError::DeviceGone`].
pub struct DeviceSession {
    id: SessionId,
    io: Mutex<SessionIo>,
    consumers: AtomicUsize,
    destroyed: AtomicBool,
    teardown_hook: Option<TeardownHook>,
}

impl DeviceSession {
    pub fn new(id: SessionId, binding: DeviceBinding) -> Self {
        Self {
            id,
            io: Mutex::new(SessionIo {
                binding: Some(binding),
                snapshot: ConfigSnapshot::default(),
            }),
            consumers: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
            teardown_hook: None,
        }
    }

    /// Registers a callback run exactly once when the session is destroyed.
    pub fn with_teardown_hook(mut self, hook: TeardownHook) -> Self {
        self.teardown_hook = Some(hook);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    fn lock_io(&self) -> MutexGuard<'_, SessionIo> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against the binding while holding the I/O lock.
    pub(crate) fn with_binding<R>(&self, f: impl FnOnce(&DeviceBinding) -> Result<R, AmbaError>) -> Result<R, AmbaError> {
        let io = self.lock_io();
        let binding = io.binding.as_ref().ok_or(AmbaError::DeviceGone)?;
        f(binding)
    }

    pub fn send_command(&self, request: &AmbaRequest) -> Result<CommandResponse, AmbaError> {
        let encoded = request.encode();
        let mut io = self.lock_io();
        let binding = io.binding.as_ref().ok_or(AmbaError::DeviceGone)?;

        let mut data = match encoded.direction {
            Direction::Out => encoded.payload,
            Direction::In => vec![0u8; encoded.expected_length],
        };
        let control = ControlRequest {
            request: encoded.request_code,
            direction: encoded.direction,
            value: encoded.value,
            index: encoded.index,
        };
        let transferred = binding.transport()
                                 .send_control(control, &mut data, CONTROL_TIMEOUT)
                                 .map_err(|e| {
                                     warn!("Session {}: {:?} failed: {}", self.id, request.command(), e);
                                     AmbaError::from(e)
                                 })?;

        if transferred != encoded.expected_length {
            match encoded.direction {
                Direction::Out => {
                    warn!("Session {}: {:?} accepted {} of {} bytes", self.id, request.command(), transferred,
                        encoded.expected_length);
                    return Err(AmbaError::TransferMismatch {
                        expected: encoded.expected_length,
                        actual: transferred,
                    });
                }
                Direction::In => warn!("Session {}: {:?} returned {} bytes, expected {}", self.id, request.command(),
                    transferred, encoded.expected_length),
            }
        }

        match encoded.direction {
            Direction::Out => {
                io.snapshot.record(request);
                data.clear();
            }
            Direction::In => data.truncate(transferred),
        }
        Ok(CommandResponse {
            transferred,
            data,
        })
    }

    /// Runs the bring-up sequence with the values from `config`.
    ///
    /// Every step is attempted and failures are logged and noted in the
    /// report. Only a vanished device stops the sequence early. Afterwards the
    /// first failed step in `config.critical_steps` fails the whole bring-up.
    pub fn initialize(&self, config: &AmbaConfig) -> Result<BringUpReport, AmbaError> {
        info!("Session {}: initializing device", self.id);
        let mut report = BringUpReport::default();
        let mut critical_failure = None;
        for step in BringUpStep::SEQUENCE {
            match self.run_bring_up_step(step, config, &mut report) {
                Ok(()) => debug!("Session {}: bring-up step {:?} done", self.id, step),
                Err(AmbaError::DeviceGone) => return Err(AmbaError::DeviceGone),
                Err(e) => {
                    report.failed_steps |= step.flag();
                    if config.critical_steps.contains_step(step) {
                        error!("Session {}: critical bring-up step {:?} failed: {}", self.id, step, e);
                        critical_failure.get_or_insert((step, e));
                    } else {
                        warn!("Session {}: bring-up step {:?} failed, continuing: {}", self.id, step, e);
                    }
                }
            }
        }
        if let Some((step, source)) = critical_failure {
            return Err(AmbaError::BringUpFailed {
                step,
                source: Box::new(source),
            });
        }
        if let (Some(chip), Some(firmware)) = (&report.chip_version, &report.firmware_version) {
            info!("Session {}: chip version {}, firmware version {}", self.id, chip, firmware);
        }
        Ok(report)
    }

    fn run_bring_up_step(&self, step: BringUpStep, config: &AmbaConfig, report: &mut BringUpReport) -> Result<(), AmbaError> {
        let request = match step {
            BringUpStep::ChipVersion => {
                let response = self.send_command(&AmbaRequest::GetChipVersion)?;
                report.chip_version = Some(ChipVersion::decode(&response.data)?);
                return Ok(());
            }
            BringUpStep::FirmwareVersion => {
                let response = self.send_command(&AmbaRequest::GetFirmwareVersion)?;
                report.firmware_version = Some(FirmwareVersion::decode(&response.data)?);
                return Ok(());
            }
            BringUpStep::EncodeFormat => AmbaRequest::SetEncodeFormat(config.encode_format),
            BringUpStep::AppendHeader => AmbaRequest::SetAppendHeader(config.append_header),
            BringUpStep::EncodeSize => AmbaRequest::SetEncodeSize(config.encode_size),
            BringUpStep::Bitrate => AmbaRequest::SetH264Bitrate(config.h264_bitrate),
            BringUpStep::Framerate => AmbaRequest::SetH264Framerate(config.h264_framerate),
            BringUpStep::VinDevice => AmbaRequest::SetVinDevice(config.vin_device),
            BringUpStep::VoutDevice => AmbaRequest::SetVoutDevice(config.vout_device),
            BringUpStep::BootDsp => AmbaRequest::BootDsp,
            BringUpStep::ImageParameters => AmbaRequest::SetImagePara(config.image_parameters),
        };
        self.send_command(&request).map(|_| ())
    }

    /// Adds a consumer reference and returns the new count.
    pub(crate) fn acquire(&self) -> usize {
        self.consumers.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drops a consumer reference. Returns true when this call destroyed the session.
    pub(crate) fn release(&self) -> bool {
        match self.consumers.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1)) {
            Ok(1) => self.teardown_if_unused(),
            Ok(_) => false,
            Err(_) => {
                error!("Session {}: release without a matching acquire", self.id);
                false
            }
        }
    }

    /// Marks the device as physically gone. Later I/O fails with `DeviceGone`.
    pub(crate) fn invalidate(&self) -> bool {
        let binding = self.lock_io().binding.take();
        if binding.is_some() {
            info!("Session {}: device binding invalidated", self.id);
        }
        drop(binding);
        self.teardown_if_unused()
    }

    fn teardown_if_unused(&self) -> bool {
        if self.consumers.load(Ordering::SeqCst) != 0 || self.is_bound() {
            return false;
        }
        if self.destroyed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return false;
        }
        info!("Session {}: destroyed", self.id);
        if let Some(hook) = &self.teardown_hook {
            hook(self.id);
        }
        true
    }

    pub fn is_bound(&self) -> bool {
        self.lock_io().binding.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.lock_io().snapshot.clone()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            debug!("Session {}: dropped before teardown", self.id);
        }
    }
}
