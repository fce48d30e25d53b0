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

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use anyhow::Context;
use log::{debug, info, warn};
use amba_core::control::{start_encode, stop_encode};
use amba_core::{AmbaError, SessionHandle, MAX_STREAM_TRANSFER};

#[derive(Debug, Clone, Copy)]
pub struct CaptureLimits {
    pub chunk_size: usize,
    pub max_bytes: Option<u64>,
}

/// Starts encoding, copies the bitstream into `output` until `stop` is set,
/// the byte limit is reached or the device goes away, then stops encoding and
/// closes the session. Returns the number of bytes written.
///
/// Blocks the calling thread; do not run it on an async task.
pub fn run_capture(
    handle: SessionHandle,
    output: &mut dyn Write,
    limits: CaptureLimits,
    stop: &AtomicBool,
) -> anyhow::Result<u64> {
    start_encode(&handle).context("Failed to start encoding")?;
    let result = copy_stream(&handle, output, limits, stop);

    match stop_encode(&handle) {
        Ok(()) => (),
        Err(AmbaError::DeviceGone) => debug!("Device gone before encode stop"),
        Err(e) => warn!("Failed to stop encoding: {}", e),
    }
    handle.close();
    result
}

fn copy_stream(
    handle: &SessionHandle,
    output: &mut dyn Write,
    limits: CaptureLimits,
    stop: &AtomicBool,
) -> anyhow::Result<u64> {
    let mut buffer = vec![0u8; limits.chunk_size.clamp(1, MAX_STREAM_TRANSFER)];
    let mut total = 0u64;

    while !stop.load(Ordering::Relaxed) {
        let wanted = match limits.max_bytes {
            Some(max_bytes) => max_bytes.saturating_sub(total).min(buffer.len() as u64) as usize,
            None => buffer.len(),
        };
        if wanted == 0 {
            info!("Byte limit reached");
            break;
        }

        match handle.read_into(&mut buffer, wanted) {
            Ok(0) => continue,
            Ok(received) => {
                output.write_all(&buffer[..received]).context("Failed to write bitstream")?;
                total += received as u64;
            }
            Err(AmbaError::Timeout) => debug!("No data within the read timeout"),
            Err(AmbaError::DeviceGone) => {
                info!("Encoder removed, stopping capture");
                break;
            }
            Err(e) => return Err(e).context("Stream read failed"),
        }
    }

    output.flush().context("Failed to flush bitstream")?;
    Ok(total)
}
