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

use std::collections::HashMap;
use std::hash::Hash;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures::StreamExt;
use log::{debug, info, warn};
use nusb::hotplug::HotplugEvent;
use nusb::{list_devices, DeviceId, DeviceInfo};
use crate::device_manager::{SessionId, SessionRegistry};
use crate::service::{spawn_service, ServiceHandle};
use crate::usb::errors::DeviceDiscoveryError;
use crate::usb::{is_amba_device, open_amba_binding};

const RETRY_TIMEOUT: Duration = Duration::from_secs(3);
const RETRY_PERIOD: Duration = Duration::from_millis(100);

/// Remembers which session belongs to which attached device.
struct SessionTracker<K, T> {
    registry: Arc<T>,
    sessions: HashMap<K, SessionId>,
}

impl<K: Hash + Eq, T: SessionRegistry + 'static> SessionTracker<K, T> {
    fn new(registry: Arc<T>) -> Self {
        Self {
            registry,
            sessions: HashMap::new(),
        }
    }

    async fn attached(&mut self, key: K, id: SessionId) {
        if let Some(previous) = self.sessions.insert(key, id) {
            warn!("Device re-attached without removal, dropping session {}", previous);
            self.retire(previous).await;
        }
    }

    async fn detached(&mut self, key: &K) -> Option<SessionId> {
        let id = self.sessions.remove(key)?;
        self.retire(id).await;
        Some(id)
    }

    async fn detach_all(&mut self) -> Vec<SessionId> {
        self.sessions.clear();
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || registry.remove_all())
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to remove sessions: {}", e);
                Vec::new()
            })
    }

    /// Removal waits for any transfer in flight, so it runs on the blocking pool.
    async fn retire(&self, id: SessionId) {
        let registry = self.registry.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || registry.on_removal(id)).await {
            warn!("Failed to remove session {}: {}", id, e);
        }
    }
}

fn get_device_info_by_id(device_id: DeviceId) -> Option<DeviceInfo> {
    list_devices().ok()?.find(|device| device.id() == device_id)
}

/// Opens the device and registers it, on the blocking pool.
async fn try_initialize_device<T: SessionRegistry + 'static>(
    device_info: DeviceInfo,
    registry: Arc<T>,
) -> Result<SessionId, DeviceDiscoveryError> {
    let initialization = tokio::task::spawn_blocking(move || -> Result<SessionId, DeviceDiscoveryError> {
        let binding = open_amba_binding(&device_info)?;
        Ok(registry.on_arrival(binding)?)
    });
    initialization.await
                  .map_err(|e| DeviceDiscoveryError::IoError(io::Error::new(io::ErrorKind::Other, e)))?
}

/// Retries while the freshly enumerated device node is not yet accessible.
async fn initialize_device<T: SessionRegistry + 'static>(
    device_info: &DeviceInfo,
    registry: &Arc<T>,
) -> Option<Result<SessionId, DeviceDiscoveryError>> {
    let deadline = Instant::now() + RETRY_TIMEOUT;
    while Instant::now() < deadline {
        if let Some(current_info) = get_device_info_by_id(device_info.id()) {
            match try_initialize_device(current_info, registry.clone()).await {
                Err(DeviceDiscoveryError::IoError(e)) => debug!("Device not ready yet: {}", e),
                result => return Some(result),
            }
        }
        tokio::time::sleep(RETRY_PERIOD).await;
    }
    None
}

fn log_device_initialize_result(result: &Option<Result<SessionId, DeviceDiscoveryError>>, device_info: &DeviceInfo) {
    match result {
        Some(Ok(id)) => info!("Amba encoder found: \"{}\" ({:04X}:{:04X}) as session {}",
                              device_info.product_string().unwrap_or("Unknown"),
                              device_info.vendor_id(),
                              device_info.product_id(),
                              id),
        Some(Err(e)) => warn!("Failed to initialize device {:04x}:{:04x}: {}",
                              device_info.vendor_id(),
                              device_info.product_id(),
                              e),
        None => warn!("Failed to initialize device {:04x}:{:04x}: Timeout",
                      device_info.vendor_id(),
                      device_info.product_id()),
    }
}

async fn attach_device<T: SessionRegistry + 'static>(
    device_info: DeviceInfo,
    tracker: &mut SessionTracker<DeviceId, T>,
) {
    let result = initialize_device(&device_info, &tracker.registry).await;
    log_device_initialize_result(&result, &device_info);
    if let Some(Ok(id)) = result {
        tracker.attached(device_info.id(), id).await;
    }
}

/// Watches USB hotplug events and feeds matching devices into `registry`.
///
/// Already attached encoders are registered first. Events are handled one
/// at a time, so a removal is never processed before the arrival it follows.
/// Shutting the service down removes every session it registered.
pub async fn run_usb_device_watch<T: SessionRegistry + 'static>(
    registry: Arc<T>,
) -> Result<ServiceHandle, anyhow::Error> {
    let mut devices_plug_events_stream = nusb::watch_devices()?;

    Ok(spawn_service(move |mut stop| async move {
        let mut tracker = SessionTracker::new(registry);

        let present: Vec<DeviceInfo> = match list_devices() {
            Ok(devices) => devices.filter(is_amba_device).collect(),
            Err(e) => {
                warn!("Failed to list USB devices: {}", e);
                Vec::new()
            }
        };
        for device_info in present {
            attach_device(device_info, &mut tracker).await;
        }

        loop {
            tokio::select! {
                maybe_event = devices_plug_events_stream.next() => {
                    match maybe_event {
                        Some(HotplugEvent::Connected(device_info)) if is_amba_device(&device_info) => {
                            attach_device(device_info, &mut tracker).await;
                        }
                        Some(HotplugEvent::Connected(_)) => (),
                        Some(HotplugEvent::Disconnected(device_id)) => {
                            if let Some(id) = tracker.detached(&device_id).await {
                                info!("Amba encoder removed, session {}", id);
                            }
                        }
                        None => {
                            debug!("Device events stream ended");
                            break;
                        }
                    }
                },
                _ = stop.signaled() => {
                    debug!("Shutdown requested, stopping USB device watch task");
                    break;
                }
            }
        }

        let removed = tracker.detach_all().await;
        debug!("USB device watch stopped, {} session(s) removed", removed.len());
    }))
}
