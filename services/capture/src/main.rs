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

mod capture;
mod cli;
mod logger;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{anyhow, Context};
use clap::Parser;
use log::{info, warn};
use tokio::sync::{broadcast, oneshot};
use amba_core::{run_usb_device_watch, DeviceEvent, DeviceRegistry, SessionId};
use crate::capture::{run_capture, CaptureLimits};
use crate::cli::Cli;

async fn wait_for_device(
    registry: &DeviceRegistry,
    events: &mut broadcast::Receiver<DeviceEvent>,
    timeout: Duration,
) -> anyhow::Result<SessionId> {
    let wait = async {
        loop {
            if let Some(id) = registry.session_ids().first() {
                return Ok(*id);
            }
            match events.recv().await {
                Ok(DeviceEvent::Added(id)) => return Ok(id),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(anyhow!("Device event channel closed")),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .with_context(|| format!("No Amba encoder appeared within {} s", timeout.as_secs()))?
}

fn open_output(cli: &Cli) -> anyhow::Result<Box<dyn Write + Send>> {
    Ok(match &cli.output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init_logger(cli.log_level, cli.log_file.as_deref())?;

    let registry = Arc::new(DeviceRegistry::new(cli.amba_config()));
    let mut events = registry.subscribe();
    let watch = run_usb_device_watch(registry.clone()).await?;

    let id = wait_for_device(&registry, &mut events, Duration::from_secs(cli.wait_secs)).await?;
    let handle = registry.open(id).with_context(|| format!("Failed to open session {}", id))?;
    let mut output = open_output(&cli)?;
    let limits = CaptureLimits {
        chunk_size: cli.chunk_size,
        max_bytes: cli.max_bytes,
    };
    info!("Capturing from session {}", id);

    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, mut done_rx) = oneshot::channel();
    {
        let stop = stop.clone();
        std::thread::spawn(move || {
            let _ = done_tx.send(run_capture(handle, &mut output, limits, &stop));
        });
    }

    let result = tokio::select! {
        result = &mut done_rx => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, stopping capture");
            stop.store(true, Ordering::Relaxed);
            (&mut done_rx).await
        }
    };

    if let Err(e) = watch.shutdown().await {
        warn!("USB device watch did not stop cleanly: {}", e);
    }

    let written = result.context("Capture thread ended unexpectedly")??;
    info!("Captured {} bytes", written);
    Ok(())
}
