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

use bitflags::bitflags;

bitflags! {
    /// Flags sent with the `append_header` request.
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
    pub struct AppendHeaderFlags: u32 {
        /// Prepend the vendor frame header (magic 0xCC, format, frame type) to each frame.
        const FrameHeader = 0x01;
    }
}

/// Container/codec combination produced by the encoder.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum EncodeFormat {
    #[default]
    H264 = 0,
    Mjpeg = 1,
    H264Mjpeg = 2,
    H264Ts = 3,
    H264Aac = 4,
    H264Pcm = 5,
    H264MjpegAac = 6,
    MjpegAac = 7,
    MjpegPcm = 8,
}

/// H.264 stream resolution selector.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum H264Size {
    Size1920x1080 = 0,
    Size1440x1080 = 1,
    #[default]
    Size1280x720 = 2,
    Size640x480 = 3,
    Size352x288 = 10,
}

/// MJPEG stream resolution selector.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum MjpegSize {
    Size640x480 = 0,
    #[default]
    Size352x288 = 5,
}

/// Video input source.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum VinDevice {
    #[default]
    Sensor = 0,
    TvDecoder = 1,
    HdSdi = 2,
}

/// Video output sink.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum VoutDevice {
    #[default]
    Tv = 0,
    Lcd = 1,
}

/// Stream selector carried by the start/stop encode requests.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum EncodingKind {
    #[default]
    H264 = 0,
    Mjpeg = 1,
}

/// Image tuning controls exposed by the sensor pipeline.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ImageAdjustment {
    Brightness,
    Contrast,
    Hue,
    Sharpness,
    Saturation,
}

impl ImageAdjustment {
    /// Inclusive range accepted by the device.
    pub const fn range(self) -> (i32, i32) {
        match self {
            ImageAdjustment::Brightness => (-256, 256),
            ImageAdjustment::Contrast => (0, 256),
            ImageAdjustment::Hue => (-128, 128),
            ImageAdjustment::Sharpness => (0, 5),
            ImageAdjustment::Saturation => (0, 256),
        }
    }

    /// Value the device powers up with.
    pub const fn default_value(self) -> i32 {
        match self {
            ImageAdjustment::Contrast | ImageAdjustment::Saturation => 64,
            _ => 0,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ImageAdjustment::Brightness => "brightness",
            ImageAdjustment::Contrast => "contrast",
            ImageAdjustment::Hue => "hue",
            ImageAdjustment::Sharpness => "sharpness",
            ImageAdjustment::Saturation => "saturation",
        }
    }

    pub fn contains(self, value: i32) -> bool {
        let (min, max) = self.range();
        (min..=max).contains(&value)
    }
}
