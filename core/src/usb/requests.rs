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

use std::fmt;
use crate::definitions::{AppendHeaderFlags, EncodeFormat, EncodingKind, H264Size, ImageAdjustment, MjpegSize, VinDevice, VoutDevice};
use crate::usb::errors::AmbaError;

/// Class request writing the current value of a parameter.
pub const SET_CUR: u8 = 0x01;
/// Class request reading the current value of a parameter.
pub const GET_CUR: u8 = 0x81;
/// bmRequestType for SET_CUR: class, interface, host-to-device.
pub const REQUEST_TYPE_OUT: u8 = 0x21;
/// bmRequestType for GET_CUR: class, interface, device-to-host.
pub const REQUEST_TYPE_IN: u8 = 0xA1;
/// wIndex shared by every vendor parameter.
pub const AMBA_REQUEST_INDEX: u16 = 0xF000;

pub const CHIP_VERSION_LENGTH: usize = 4;
pub const FIRMWARE_VERSION_LENGTH: usize = 12;
pub const IMAGE_PARAMETER_BLOCK_LENGTH: usize = 20;
pub const ENCODE_SIZE_PAIR_LENGTH: usize = 8;
const U32_PARAMETER_LENGTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// SET: host to device.
    Out,
    /// GET: device to host.
    In,
}

/// Vendor commands understood by the encoder firmware.
///
/// The discriminant is the wValue selecting the parameter on the device.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AmbaCommand {
    GetChipVersion = 0x0300,
    GetFirmwareVersion = 0x0400,
    RebootSystem = 0x0500,
    BootDsp = 0x0600,
    StartEncode = 0x0700,
    StopEncode = 0x0800,
    SetEncodeFormat = 0x0B00,
    SetH264Framerate = 0x0C00,
    SetH264Bitrate = 0x1000,
    SetEncodeSize = 0x1500,
    SetVinDevice = 0x1600,
    SetVoutDevice = 0x1900,
    SetBrightness = 0x2900,
    SetContrast = 0x2A00,
    SetHue = 0x2B00,
    SetSaturation = 0x2C00,
    SetSharpness = 0x2D00,
    ImagePara = 0x3100,
    SetAppendHeader = 0x3900,
}

/// Immutable wire description of one vendor command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub command: AmbaCommand,
    pub request_code: u8,
    pub direction: Direction,
    pub value: u16,
    pub index: u16,
    /// Payload length in bytes, in the transfer direction.
    pub length: usize,
}

impl AmbaCommand {
    pub const ALL: [AmbaCommand; 19] = [
        AmbaCommand::GetChipVersion,
        AmbaCommand::GetFirmwareVersion,
        AmbaCommand::RebootSystem,
        AmbaCommand::BootDsp,
        AmbaCommand::StartEncode,
        AmbaCommand::StopEncode,
        AmbaCommand::SetEncodeFormat,
        AmbaCommand::SetH264Framerate,
        AmbaCommand::SetH264Bitrate,
        AmbaCommand::SetEncodeSize,
        AmbaCommand::SetVinDevice,
        AmbaCommand::SetVoutDevice,
        AmbaCommand::SetBrightness,
        AmbaCommand::SetContrast,
        AmbaCommand::SetHue,
        AmbaCommand::SetSaturation,
        AmbaCommand::SetSharpness,
        AmbaCommand::ImagePara,
        AmbaCommand::SetAppendHeader,
    ];

    pub const fn descriptor(self) -> CommandDescriptor {
        let (direction, length) = match self {
            AmbaCommand::GetChipVersion => (Direction::In, CHIP_VERSION_LENGTH),
            AmbaCommand::GetFirmwareVersion => (Direction::In, FIRMWARE_VERSION_LENGTH),
            AmbaCommand::ImagePara => (Direction::Out, IMAGE_PARAMETER_BLOCK_LENGTH),
            AmbaCommand::RebootSystem | AmbaCommand::BootDsp => (Direction::Out, 0),
            AmbaCommand::SetEncodeSize => (Direction::Out, ENCODE_SIZE_PAIR_LENGTH),
            _ => (Direction::Out, U32_PARAMETER_LENGTH),
        };
        let request_code = match direction {
            Direction::Out => SET_CUR,
            Direction::In => GET_CUR,
        };
        CommandDescriptor {
            command: self,
            request_code,
            direction,
            value: self as u16,
            index: AMBA_REQUEST_INDEX,
            length,
        }
    }

    pub const fn for_adjustment(adjustment: ImageAdjustment) -> AmbaCommand {
        match adjustment {
            ImageAdjustment::Brightness => AmbaCommand::SetBrightness,
            ImageAdjustment::Contrast => AmbaCommand::SetContrast,
            ImageAdjustment::Hue => AmbaCommand::SetHue,
            ImageAdjustment::Sharpness => AmbaCommand::SetSharpness,
            ImageAdjustment::Saturation => AmbaCommand::SetSaturation,
        }
    }
}

impl TryFrom<u16> for AmbaCommand {
    type Error = AmbaError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        AmbaCommand::ALL
            .into_iter()
            .find(|command| *command as u16 == value)
            .ok_or_else(|| AmbaError::ProtocolMisuse(format!("unknown command value {:#06x}", value)))
    }
}

/// H.264 and MJPEG resolution selectors sent together by `encode_size`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeSizePair {
    pub h264_size: u32,
    pub mjpeg_size: u32,
}

impl EncodeSizePair {
    pub fn new(h264: H264Size, mjpeg: MjpegSize) -> Self {
        Self {
            h264_size: h264 as u32,
            mjpeg_size: mjpeg as u32,
        }
    }

    pub fn to_bytes(&self) -> [u8; ENCODE_SIZE_PAIR_LENGTH] {
        let mut raw = [0u8; ENCODE_SIZE_PAIR_LENGTH];
        raw[..4].copy_from_slice(&self.h264_size.to_le_bytes());
        raw[4..].copy_from_slice(&self.mjpeg_size.to_le_bytes());
        raw
    }
}

/// A vendor command together with its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbaRequest {
    GetChipVersion,
    GetFirmwareVersion,
    /// Reads the image parameter block back with GET_CUR.
    GetImagePara,
    SetImagePara(ImageParameterBlock),
    RebootSystem,
    BootDsp,
    StartEncode(EncodingKind),
    StopEncode(EncodingKind),
    SetEncodeFormat(EncodeFormat),
    SetEncodeSize(EncodeSizePair),
    /// Frame rate in frames per second, 0 selects the sensor default.
    SetH264Framerate(u32),
    /// Bitrate in kbps.
    SetH264Bitrate(u32),
    SetVinDevice(VinDevice),
    SetVoutDevice(VoutDevice),
    SetImageAdjustment(ImageAdjustment, i32),
    SetAppendHeader(AppendHeaderFlags),
}

/// Control transfer ready to be handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRequest {
    pub request_code: u8,
    pub direction: Direction,
    pub value: u16,
    pub index: u16,
    /// Outgoing data, empty for device-to-host requests.
    pub payload: Vec<u8>,
    pub expected_length: usize,
}

impl AmbaRequest {
    pub fn command(&self) -> AmbaCommand {
        match self {
            AmbaRequest::GetChipVersion => AmbaCommand::GetChipVersion,
            AmbaRequest::GetFirmwareVersion => AmbaCommand::GetFirmwareVersion,
            AmbaRequest::GetImagePara | AmbaRequest::SetImagePara(_) => AmbaCommand::ImagePara,
            AmbaRequest::RebootSystem => AmbaCommand::RebootSystem,
            AmbaRequest::BootDsp => AmbaCommand::BootDsp,
            AmbaRequest::StartEncode(_) => AmbaCommand::StartEncode,
            AmbaRequest::StopEncode(_) => AmbaCommand::StopEncode,
            AmbaRequest::SetEncodeFormat(_) => AmbaCommand::SetEncodeFormat,
            AmbaRequest::SetEncodeSize(_) => AmbaCommand::SetEncodeSize,
            AmbaRequest::SetH264Framerate(_) => AmbaCommand::SetH264Framerate,
            AmbaRequest::SetH264Bitrate(_) => AmbaCommand::SetH264Bitrate,
            AmbaRequest::SetVinDevice(_) => AmbaCommand::SetVinDevice,
            AmbaRequest::SetVoutDevice(_) => AmbaCommand::SetVoutDevice,
            AmbaRequest::SetImageAdjustment(adjustment, _) => AmbaCommand::for_adjustment(*adjustment),
            AmbaRequest::SetAppendHeader(_) => AmbaCommand::SetAppendHeader,
        }
    }

    pub fn encode(&self) -> EncodedRequest {
        let descriptor = self.command().descriptor();
        let (request_code, direction) = match self {
            AmbaRequest::GetImagePara => (GET_CUR, Direction::In),
            _ => (descriptor.request_code, descriptor.direction),
        };
        let payload = match self {
            AmbaRequest::GetChipVersion
            | AmbaRequest::GetFirmwareVersion
            | AmbaRequest::GetImagePara
            | AmbaRequest::RebootSystem
            | AmbaRequest::BootDsp => Vec::new(),
            AmbaRequest::StartEncode(kind) | AmbaRequest::StopEncode(kind) => encode_u32(*kind as u32),
            AmbaRequest::SetEncodeFormat(format) => encode_u32(*format as u32),
            AmbaRequest::SetEncodeSize(sizes) => sizes.to_bytes().to_vec(),
            AmbaRequest::SetImagePara(block) => block.0.to_vec(),
            AmbaRequest::SetH264Framerate(fps) => encode_u32(*fps),
            AmbaRequest::SetH264Bitrate(kbps) => encode_u32(*kbps),
            AmbaRequest::SetVinDevice(vin) => encode_u32(*vin as u32),
            AmbaRequest::SetVoutDevice(vout) => encode_u32(*vout as u32),
            AmbaRequest::SetImageAdjustment(_, value) => value.to_le_bytes().to_vec(),
            AmbaRequest::SetAppendHeader(flags) => encode_u32(flags.bits()),
        };
        EncodedRequest {
            request_code,
            direction,
            value: descriptor.value,
            index: descriptor.index,
            payload,
            expected_length: descriptor.length,
        }
    }
}

fn encode_u32(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn decode_u32(raw: &[u8]) -> Result<u32, AmbaError> {
    let bytes: [u8; 4] = raw.try_into().map_err(|_| AmbaError::TransferMismatch {
        expected: U32_PARAMETER_LENGTH,
        actual: raw.len(),
    })?;
    Ok(u32::from_le_bytes(bytes))
}

fn fixed<const N: usize>(raw: &[u8]) -> Result<[u8; N], AmbaError> {
    raw.try_into().map_err(|_| AmbaError::TransferMismatch {
        expected: N,
        actual: raw.len(),
    })
}

fn write_hex(f: &mut fmt::Formatter<'_>, raw: &[u8]) -> fmt::Result {
    for byte in raw {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

/// Chip version record, contents are vendor defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipVersion(pub [u8; CHIP_VERSION_LENGTH]);

impl ChipVersion {
    pub fn decode(raw: &[u8]) -> Result<Self, AmbaError> {
        Ok(Self(fixed(raw)?))
    }
}

impl fmt::Display for ChipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

/// Firmware version record, contents are vendor defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion(pub [u8; FIRMWARE_VERSION_LENGTH]);

impl FirmwareVersion {
    pub fn decode(raw: &[u8]) -> Result<Self, AmbaError> {
        Ok(Self(fixed(raw)?))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

/// Image parameter block of the sensor pipeline, contents are vendor defined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageParameterBlock(pub [u8; IMAGE_PARAMETER_BLOCK_LENGTH]);

impl ImageParameterBlock {
    pub fn decode(raw: &[u8]) -> Result<Self, AmbaError> {
        Ok(Self(fixed(raw)?))
    }
}

impl fmt::Display for ImageParameterBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_requests() -> Vec<(AmbaRequest, u32)> {
        vec![
            (AmbaRequest::SetEncodeFormat(EncodeFormat::MjpegPcm), 8),
            (AmbaRequest::SetH264Bitrate(1000), 1000),
            (AmbaRequest::SetH264Bitrate(0x1234_5678), 0x1234_5678),
            (AmbaRequest::SetH264Framerate(30), 30),
            (AmbaRequest::SetVinDevice(VinDevice::HdSdi), 2),
            (AmbaRequest::SetVoutDevice(VoutDevice::Lcd), 1),
            (AmbaRequest::StartEncode(EncodingKind::H264), 0),
            (AmbaRequest::StopEncode(EncodingKind::Mjpeg), 1),
            (AmbaRequest::SetAppendHeader(AppendHeaderFlags::FrameHeader), 1),
            (AmbaRequest::SetImageAdjustment(ImageAdjustment::Contrast, 64), 64),
        ]
    }

    #[test]
    fn every_descriptor_uses_the_shared_index_and_matching_request_code() {
        for command in AmbaCommand::ALL {
            let descriptor = command.descriptor();
            assert_eq!(descriptor.index, 0xF000);
            assert_eq!(descriptor.value, command as u16);
            match descriptor.direction {
                Direction::Out => assert_eq!(descriptor.request_code, SET_CUR),
                Direction::In => assert_eq!(descriptor.request_code, GET_CUR),
            }
        }
    }

    #[test]
    fn descriptor_lengths_follow_the_wire_table() {
        assert_eq!(AmbaCommand::GetChipVersion.descriptor().length, 4);
        assert_eq!(AmbaCommand::GetFirmwareVersion.descriptor().length, 12);
        assert_eq!(AmbaCommand::ImagePara.descriptor().length, 20);
        assert_eq!(AmbaCommand::SetEncodeSize.descriptor().length, 8);
        assert_eq!(AmbaCommand::BootDsp.descriptor().length, 0);
        assert_eq!(AmbaCommand::RebootSystem.descriptor().length, 0);
        assert_eq!(AmbaCommand::SetSharpness.descriptor().value, 0x2D00);
        assert_eq!(AmbaCommand::SetSaturation.descriptor().value, 0x2C00);
    }

    #[test]
    fn integer_requests_encode_little_endian_with_declared_length() {
        for (request, value) in u32_requests() {
            let encoded = request.encode();
            assert_eq!(encoded.payload.len(), encoded.expected_length, "{:?}", request);
            assert_eq!(encoded.payload[0], (value & 0xFF) as u8, "{:?}", request);
            assert_eq!(decode_u32(&encoded.payload).unwrap(), value, "{:?}", request);
        }
    }

    #[test]
    fn negative_brightness_encodes_as_twos_complement() {
        let encoded = AmbaRequest::SetImageAdjustment(ImageAdjustment::Brightness, -256).encode();
        assert_eq!(encoded.value, 0x2900);
        assert_eq!(encoded.payload, vec![0x00, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn encode_size_pair_is_two_consecutive_le_fields() {
        let pair = EncodeSizePair { h264_size: 2, mjpeg_size: 0x0102_0305 };
        let encoded = AmbaRequest::SetEncodeSize(pair).encode();
        assert_eq!(encoded.payload.len(), 8);
        assert_eq!(&encoded.payload[..4], &2u32.to_le_bytes());
        assert_eq!(&encoded.payload[4..], &0x0102_0305u32.to_le_bytes());
        assert_eq!(encoded.value, 0x1500);
    }

    #[test]
    fn zero_length_and_get_requests_carry_no_payload() {
        for request in [AmbaRequest::BootDsp, AmbaRequest::RebootSystem] {
            let encoded = request.encode();
            assert!(encoded.payload.is_empty());
            assert_eq!(encoded.expected_length, 0);
            assert_eq!(encoded.direction, Direction::Out);
        }
        let chip = AmbaRequest::GetChipVersion.encode();
        assert!(chip.payload.is_empty());
        assert_eq!(chip.expected_length, 4);
        assert_eq!(chip.direction, Direction::In);
        assert_eq!(chip.request_code, 0x81);
    }

    #[test]
    fn image_parameter_block_is_pushed_with_set_and_read_back_with_get() {
        let block = ImageParameterBlock(core::array::from_fn(|i| i as u8));
        let push = AmbaRequest::SetImagePara(block).encode();
        assert_eq!(push.request_code, SET_CUR);
        assert_eq!(push.direction, Direction::Out);
        assert_eq!(push.value, 0x3100);
        assert_eq!(push.payload, block.0.to_vec());
        assert_eq!(push.expected_length, 20);

        let read = AmbaRequest::GetImagePara.encode();
        assert_eq!(read.request_code, GET_CUR);
        assert_eq!(read.direction, Direction::In);
        assert_eq!(read.value, 0x3100);
        assert!(read.payload.is_empty());
        assert_eq!(read.expected_length, 20);
    }

    #[test]
    fn unknown_command_value_is_protocol_misuse() {
        assert_eq!(AmbaCommand::try_from(0x0B00).unwrap(), AmbaCommand::SetEncodeFormat);
        assert!(matches!(AmbaCommand::try_from(0x0100), Err(AmbaError::ProtocolMisuse(_))));
    }

    #[test]
    fn version_records_check_length_only() {
        let chip = ChipVersion::decode(&[0xA2, 0x00, 0x01, 0x10]).unwrap();
        assert_eq!(chip.to_string(), "a2000110");
        assert!(matches!(
            ChipVersion::decode(&[1, 2]),
            Err(AmbaError::TransferMismatch { expected: 4, actual: 2 })
        ));
        assert!(FirmwareVersion::decode(&[0u8; 12]).is_ok());
        assert!(FirmwareVersion::decode(&[0u8; 11]).is_err());
        assert!(ImageParameterBlock::decode(&[7u8; 20]).is_ok());
    }
}
