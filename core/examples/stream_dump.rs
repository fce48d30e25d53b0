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

use std::sync::Arc;
use anyhow::Result;
use amba_core::control::{start_encode, stop_encode};
use amba_core::{run_usb_device_watch, DeviceEvent, DeviceRegistry, SessionHandle};
use log::{info, warn};

const CHUNKS: usize = 16;

/// Reads a few chunks and reports their sizes. Runs on its own thread.
fn dump(handle: SessionHandle) -> Result<()> {
    start_encode(&handle)?;
    for _ in 0..CHUNKS {
        match handle.read_stream(64 * 1024) {
            Ok(chunk) => info!("Session {}: read {} bytes", handle.id(), chunk.len()),
            Err(e) => {
                warn!("Read failed: {}", e);
                break;
            }
        }
    }
    stop_encode(&handle)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let registry = Arc::new(DeviceRegistry::default());
    let mut device_events = registry.subscribe();
    let watch = run_usb_device_watch(registry.clone()).await?;
    info!("Waiting for an Amba encoder, press Ctrl+C to quit");

    loop {
        tokio::select! {
            event = device_events.recv() => match event {
                Ok(DeviceEvent::Added(id)) => {
                    let handle = registry.open(id)?;
                    std::thread::spawn(move || {
                        if let Err(e) = dump(handle) {
                            warn!("Stream dump failed: {}", e);
                        }
                    });
                }
                Ok(DeviceEvent::Removed(id)) => info!("Session {} removed", id),
                Ok(DeviceEvent::Destroyed(id)) => info!("Session {} destroyed", id),
                Err(e) => warn!("Device event error: {}", e),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    watch.shutdown().await?;
    Ok(())
}
