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

use std::path::PathBuf;
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use amba_core::definitions::{AppendHeaderFlags, EncodeFormat, H264Size, MjpegSize, VinDevice, VoutDevice};
use amba_core::usb::requests::EncodeSizePair;
use amba_core::{AmbaConfig, BringUpStep, BringUpSteps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    H264,
    Mjpeg,
    H264Mjpeg,
    H264Ts,
    H264Aac,
    H264Pcm,
    H264MjpegAac,
    MjpegAac,
    MjpegPcm,
}

impl From<FormatArg> for EncodeFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::H264 => EncodeFormat::H264,
            FormatArg::Mjpeg => EncodeFormat::Mjpeg,
            FormatArg::H264Mjpeg => EncodeFormat::H264Mjpeg,
            FormatArg::H264Ts => EncodeFormat::H264Ts,
            FormatArg::H264Aac => EncodeFormat::H264Aac,
            FormatArg::H264Pcm => EncodeFormat::H264Pcm,
            FormatArg::H264MjpegAac => EncodeFormat::H264MjpegAac,
            FormatArg::MjpegAac => EncodeFormat::MjpegAac,
            FormatArg::MjpegPcm => EncodeFormat::MjpegPcm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum H264SizeArg {
    #[value(name = "1920x1080")]
    FullHd,
    #[value(name = "1440x1080")]
    Anamorphic,
    #[value(name = "1280x720")]
    Hd,
    #[value(name = "640x480")]
    Vga,
    #[value(name = "352x288")]
    Cif,
}

impl From<H264SizeArg> for H264Size {
    fn from(value: H264SizeArg) -> Self {
        match value {
            H264SizeArg::FullHd => H264Size::Size1920x1080,
            H264SizeArg::Anamorphic => H264Size::Size1440x1080,
            H264SizeArg::Hd => H264Size::Size1280x720,
            H264SizeArg::Vga => H264Size::Size640x480,
            H264SizeArg::Cif => H264Size::Size352x288,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MjpegSizeArg {
    #[value(name = "640x480")]
    Vga,
    #[value(name = "352x288")]
    Cif,
}

impl From<MjpegSizeArg> for MjpegSize {
    fn from(value: MjpegSizeArg) -> Self {
        match value {
            MjpegSizeArg::Vga => MjpegSize::Size640x480,
            MjpegSizeArg::Cif => MjpegSize::Size352x288,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VinArg {
    Sensor,
    TvDecoder,
    HdSdi,
}

impl From<VinArg> for VinDevice {
    fn from(value: VinArg) -> Self {
        match value {
            VinArg::Sensor => VinDevice::Sensor,
            VinArg::TvDecoder => VinDevice::TvDecoder,
            VinArg::HdSdi => VinDevice::HdSdi,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VoutArg {
    Tv,
    Lcd,
}

impl From<VoutArg> for VoutDevice {
    fn from(value: VoutArg) -> Self {
        match value {
            VoutArg::Tv => VoutDevice::Tv,
            VoutArg::Lcd => VoutDevice::Lcd,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Set the log level
    #[arg(short, long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Also write the log to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Bitstream destination, stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Stop after this many bytes
    #[arg(long)]
    pub max_bytes: Option<u64>,

    /// Bytes requested per read
    #[arg(long, default_value_t = 65536)]
    pub chunk_size: usize,

    /// How long to wait for an encoder to appear
    #[arg(long, default_value_t = 10)]
    pub wait_secs: u64,

    #[arg(long, value_enum, default_value_t = FormatArg::H264)]
    pub format: FormatArg,

    #[arg(long, value_enum, default_value_t = H264SizeArg::Hd)]
    pub h264_size: H264SizeArg,

    #[arg(long, value_enum, default_value_t = MjpegSizeArg::Cif)]
    pub mjpeg_size: MjpegSizeArg,

    /// H.264 bitrate in kbps
    #[arg(long, default_value_t = 1000)]
    pub bitrate: u32,

    /// Frames per second, 0 keeps the sensor default
    #[arg(long, default_value_t = 0)]
    pub framerate: u32,

    #[arg(long, value_enum, default_value_t = VinArg::Sensor)]
    pub vin: VinArg,

    #[arg(long, value_enum, default_value_t = VoutArg::Tv)]
    pub vout: VoutArg,

    /// Do not prepend the vendor frame header to each frame
    #[arg(long)]
    pub no_frame_header: bool,

    /// Bring-up step whose failure rejects the device (repeatable)
    #[arg(long = "critical", value_name = "STEP")]
    pub critical: Vec<BringUpStep>,
}

impl Cli {
    pub fn amba_config(&self) -> AmbaConfig {
        let critical_steps = if self.critical.is_empty() {
            BringUpSteps::DEFAULT_CRITICAL
        } else {
            self.critical.iter().fold(BringUpSteps::empty(), |steps, step| steps | step.flag())
        };
        let append_header = if self.no_frame_header {
            AppendHeaderFlags::empty()
        } else {
            AppendHeaderFlags::FrameHeader
        };
        AmbaConfig {
            encode_format: self.format.into(),
            append_header,
            encode_size: EncodeSizePair::new(self.h264_size.into(), self.mjpeg_size.into()),
            h264_bitrate: self.bitrate,
            h264_framerate: self.framerate,
            vin_device: self.vin.into(),
            vout_device: self.vout.into(),
            critical_steps,
            ..AmbaConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_library_config() {
        let cli = Cli::parse_from(["amba_capture"]);
        assert_eq!(cli.amba_config(), AmbaConfig::default());
        assert_eq!(cli.chunk_size, 65536);
    }

    #[test]
    fn bring_up_flags_build_the_config() {
        let cli = Cli::parse_from([
            "amba_capture",
            "--format", "mjpeg",
            "--h264-size", "1920x1080",
            "--bitrate", "4000",
            "--no-frame-header",
            "--critical", "boot-dsp",
            "--critical", "vin",
        ]);
        let config = cli.amba_config();

        assert_eq!(config.encode_format, EncodeFormat::Mjpeg);
        assert_eq!(config.encode_size, EncodeSizePair::new(H264Size::Size1920x1080, MjpegSize::Size352x288));
        assert_eq!(config.h264_bitrate, 4000);
        assert!(config.append_header.is_empty());
        assert_eq!(config.critical_steps, BringUpSteps::BootDsp | BringUpSteps::VinDevice);
    }
}
