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

use log::{debug, info};
use crate::definitions::{EncodingKind, ImageAdjustment};
use crate::device_manager::SessionHandle;
use crate::usb::errors::AmbaError;
use crate::usb::requests::{AmbaRequest, ImageParameterBlock};

/// Numeric control codes accepted by [`dispatch`].
pub const CONTROL_START_ENCODE: u32 = 0;
pub const CONTROL_STOP_ENCODE: u32 = 1;

pub fn start_encode(handle: &SessionHandle) -> Result<(), AmbaError> {
    handle.send_command(&AmbaRequest::StartEncode(EncodingKind::H264))?;
    info!("Session {}: encode started", handle.id());
    Ok(())
}

pub fn stop_encode(handle: &SessionHandle) -> Result<(), AmbaError> {
    handle.send_command(&AmbaRequest::StopEncode(EncodingKind::H264))?;
    info!("Session {}: encode stopped", handle.id());
    Ok(())
}

/// Legacy numeric control entry point.
pub fn dispatch(handle: &SessionHandle, code: u32) -> Result<(), AmbaError> {
    match code {
        CONTROL_START_ENCODE => start_encode(handle),
        CONTROL_STOP_ENCODE => stop_encode(handle),
        other => Err(AmbaError::ProtocolMisuse(format!("unknown control code {}", other))),
    }
}

pub fn set_image_adjustment(handle: &SessionHandle, adjustment: ImageAdjustment, value: i32) -> Result<(), AmbaError> {
    if !adjustment.contains(value) {
        let (min, max) = adjustment.range();
        return Err(AmbaError::ValueOutOfRange {
            name: adjustment.name(),
            value,
            min,
            max,
        });
    }
    handle.send_command(&AmbaRequest::SetImageAdjustment(adjustment, value))?;
    debug!("Session {}: {} set to {}", handle.id(), adjustment.name(), value);
    Ok(())
}

pub fn image_parameters(handle: &SessionHandle) -> Result<ImageParameterBlock, AmbaError> {
    let response = handle.send_command(&AmbaRequest::GetImagePara)?;
    ImageParameterBlock::decode(&response.data)
}

pub fn reboot(handle: &SessionHandle) -> Result<(), AmbaError> {
    handle.send_command(&AmbaRequest::RebootSystem)?;
    info!("Session {}: reboot requested", handle.id());
    Ok(())
}
