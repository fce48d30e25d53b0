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

use std::str::FromStr;
use bitflags::bitflags;
use crate::definitions::{AppendHeaderFlags, EncodeFormat, H264Size, MjpegSize, VinDevice, VoutDevice};
use crate::usb::requests::{EncodeSizePair, ImageParameterBlock};

/// One step of the device bring-up sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BringUpStep {
    ChipVersion,
    FirmwareVersion,
    EncodeFormat,
    AppendHeader,
    EncodeSize,
    Bitrate,
    Framerate,
    VinDevice,
    VoutDevice,
    BootDsp,
    ImageParameters,
}

impl BringUpStep {
    /// Execution order.
    pub const SEQUENCE: [BringUpStep; 11] = [
        BringUpStep::ChipVersion,
        BringUpStep::FirmwareVersion,
        BringUpStep::EncodeFormat,
        BringUpStep::AppendHeader,
        BringUpStep::EncodeSize,
        BringUpStep::Bitrate,
        BringUpStep::Framerate,
        BringUpStep::VinDevice,
        BringUpStep::VoutDevice,
        BringUpStep::BootDsp,
        BringUpStep::ImageParameters,
    ];

    pub const fn flag(self) -> BringUpSteps {
        BringUpSteps::from_bits_retain(1 << self as u16)
    }
}

impl FromStr for BringUpStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "chipversion" => Ok(BringUpStep::ChipVersion),
            "firmwareversion" => Ok(BringUpStep::FirmwareVersion),
            "encodeformat" => Ok(BringUpStep::EncodeFormat),
            "appendheader" => Ok(BringUpStep::AppendHeader),
            "encodesize" => Ok(BringUpStep::EncodeSize),
            "bitrate" => Ok(BringUpStep::Bitrate),
            "framerate" => Ok(BringUpStep::Framerate),
            "vindevice" | "vin" => Ok(BringUpStep::VinDevice),
            "voutdevice" | "vout" => Ok(BringUpStep::VoutDevice),
            "bootdsp" | "boot" => Ok(BringUpStep::BootDsp),
            "imageparameters" | "imagepara" => Ok(BringUpStep::ImageParameters),
            _ => Err(format!("Invalid bring-up step: {}", s)),
        }
    }
}

bitflags! {
    /// Set of bring-up steps, bit position follows [`BringUpStep`] order.
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
    pub struct BringUpSteps: u16 {
        const ChipVersion = 1 << 0;
        const FirmwareVersion = 1 << 1;
        const EncodeFormat = 1 << 2;
        const AppendHeader = 1 << 3;
        const EncodeSize = 1 << 4;
        const Bitrate = 1 << 5;
        const Framerate = 1 << 6;
        const VinDevice = 1 << 7;
        const VoutDevice = 1 << 8;
        const BootDsp = 1 << 9;
        const ImageParameters = 1 << 10;
    }
}

impl BringUpSteps {
    /// Steps without which the device cannot encode at all.
    pub const DEFAULT_CRITICAL: BringUpSteps = BringUpSteps::ChipVersion
        .union(BringUpSteps::EncodeFormat)
        .union(BringUpSteps::BootDsp);

    pub fn contains_step(&self, step: BringUpStep) -> bool {
        self.contains(step.flag())
    }
}

/// Parameters pushed to the device during bring-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbaConfig {
    pub encode_format: EncodeFormat,
    pub append_header: AppendHeaderFlags,
    pub encode_size: EncodeSizePair,
    /// H.264 bitrate in kbps.
    pub h264_bitrate: u32,
    /// Frames per second, 0 keeps the sensor default.
    pub h264_framerate: u32,
    pub vin_device: VinDevice,
    pub vout_device: VoutDevice,
    /// Block pushed as the last bring-up step.
    pub image_parameters: ImageParameterBlock,
    /// Steps whose failure aborts bring-up.
    pub critical_steps: BringUpSteps,
}

impl Default for AmbaConfig {
    fn default() -> Self {
        Self {
            encode_format: EncodeFormat::H264,
            append_header: AppendHeaderFlags::FrameHeader,
            encode_size: EncodeSizePair::new(H264Size::Size1280x720, MjpegSize::Size352x288),
            h264_bitrate: 1000,
            h264_framerate: 0,
            vin_device: VinDevice::Sensor,
            vout_device: VoutDevice::Tv,
            image_parameters: ImageParameterBlock::default(),
            critical_steps: BringUpSteps::DEFAULT_CRITICAL,
        }
    }
}
