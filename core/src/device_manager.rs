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
use std::fmt;
use std::mem::take;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use log::{error, info};
use tokio::sync::broadcast;
use crate::config::AmbaConfig;
use crate::usb::amba_device::{CommandResponse, DeviceBinding, DeviceSession};
use crate::usb::errors::AmbaError;
use crate::usb::requests::AmbaRequest;

/// First session number handed out, matching the legacy character device minor base.
pub const SESSION_ID_BASE: u32 = 192;

/// Identity of a session, unique for the lifetime of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device event types broadcast by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device finished bring-up and can be opened
    Added(SessionId),
    /// A device was unplugged; new opens fail from now on
    Removed(SessionId),
    /// The last reference to a removed device was released
    Destroyed(SessionId),
}

/// Arrival and removal entry points driven by device discovery.
pub trait SessionRegistry: Send + Sync {
    /// Creates, initializes and registers a session for a freshly attached device.
    fn on_arrival(&self, binding: DeviceBinding) -> Result<SessionId, AmbaError>;

    /// Retracts a session and invalidates its binding. Returns false for unknown ids.
    fn on_removal(&self, id: SessionId) -> bool;

    /// Retracts and invalidates every registered session.
    fn remove_all(&self) -> Vec<SessionId>;
}

/// Consumer reference to an open session. Dropping it releases the reference.
pub struct SessionHandle {
    session: Arc<DeviceSession>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub(crate) fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn send_command(&self, request: &AmbaRequest) -> Result<CommandResponse, AmbaError> {
        self.session.send_command(request)
    }

    /// Releases this consumer reference.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.session.release();
    }
}

/// Maps attached devices to sessions and arbitrates open against removal.
///
/// The lookup lock guards only the session table and is never held across a
/// transport call.
pub struct DeviceRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<DeviceSession>>>,
    next_id: AtomicU32,
    config: AmbaConfig,
    event_sender: broadcast::Sender<DeviceEvent>,
}

impl DeviceRegistry {
    pub fn new(config: AmbaConfig) -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(SESSION_ID_BASE),
            config,
            event_sender,
        }
    }

    pub fn config(&self) -> &AmbaConfig {
        &self.config
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<DeviceSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves `id` and takes a consumer reference in one step.
    pub fn open(&self, id: SessionId) -> Result<SessionHandle, AmbaError> {
        let sessions = self.lock_sessions();
        let session = sessions.get(&id).cloned().ok_or(AmbaError::NotFound(id))?;
        session.acquire();
        drop(sessions);
        Ok(SessionHandle { session })
    }

    pub fn close(&self, handle: SessionHandle) {
        handle.close();
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.lock_sessions().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_sender.subscribe()
    }
}

impl SessionRegistry for DeviceRegistry {
    fn on_arrival(&self, binding: DeviceBinding) -> Result<SessionId, AmbaError> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let event_sender = self.event_sender.clone();
        let session = Arc::new(DeviceSession::new(id, binding).with_teardown_hook(Box::new(move |id: SessionId| {
            let _ = event_sender.send(DeviceEvent::Destroyed(id));
        })));

        if let Err(e) = session.initialize(&self.config) {
            error!("Could not init amba device {}: {}", id, e);
            session.invalidate();
            return Err(e);
        }

        self.lock_sessions().insert(id, session);
        let _ = self.event_sender.send(DeviceEvent::Added(id));
        info!("Amba device now attached as session {}", id);
        Ok(id)
    }

    fn on_removal(&self, id: SessionId) -> bool {
        let session = self.lock_sessions().remove(&id);
        let Some(session) = session else {
            return false;
        };
        let _ = self.event_sender.send(DeviceEvent::Removed(id));
        session.invalidate();
        info!("Amba session {} now disconnected", id);
        true
    }

    fn remove_all(&self) -> Vec<SessionId> {
        let sessions = take(&mut *self.lock_sessions());
        let mut ids = Vec::with_capacity(sessions.len());
        for (id, session) in sessions {
            let _ = self.event_sender.send(DeviceEvent::Removed(id));
            session.invalidate();
            ids.push(id);
        }
        ids
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(AmbaConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use crate::usb::errors::TransportError;
    use crate::usb::mock_transport::{MockTransport, Reply};
    use crate::usb::requests::AmbaCommand;

    fn arrive(registry: &DeviceRegistry) -> (SessionId, Arc<MockTransport>) {
        let mock = MockTransport::healthy();
        let id = registry.on_arrival(DeviceBinding::new(mock.clone(), 0x81)).unwrap();
        (id, mock)
    }

    fn drain(receiver: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn arrival_registers_fresh_ids_from_the_minor_base() {
        let registry = DeviceRegistry::default();

        let (first, _) = arrive(&registry);
        let (second, _) = arrive(&registry);

        assert_eq!(first, SessionId(192));
        assert_eq!(second, SessionId(193));
        assert_eq!(registry.session_ids(), vec![first, second]);
    }

    #[test]
    fn failed_critical_bring_up_never_registers_the_session() {
        let registry = DeviceRegistry::default();
        let mut events = registry.subscribe();
        let mock = MockTransport::healthy();
        mock.script(AmbaCommand::SetEncodeFormat, Reply::Fail(TransportError::Stall));

        let result = registry.on_arrival(DeviceBinding::new(mock.clone(), 0x81));

        assert!(matches!(result, Err(AmbaError::BringUpFailed { .. })));
        assert!(registry.session_ids().is_empty());
        assert!(matches!(registry.open(SessionId(192)), Err(AmbaError::NotFound(SessionId(192)))));
        assert!(!drain(&mut events).iter().any(|event| matches!(event, DeviceEvent::Added(_))));
    }

    #[test]
    fn open_unknown_id_is_not_found() {
        let registry = DeviceRegistry::default();
        assert!(matches!(registry.open(SessionId(7)), Err(AmbaError::NotFound(SessionId(7)))));
    }

    #[test]
    fn balanced_open_close_keeps_session_resolvable() {
        let registry = DeviceRegistry::default();
        let (id, _) = arrive(&registry);

        let handles: Vec<SessionHandle> = (0..3).map(|_| registry.open(id).unwrap()).collect();
        assert_eq!(handles[0].session().consumer_count(), 3);
        for handle in handles {
            registry.close(handle);
        }

        let handle = registry.open(id).unwrap();
        assert_eq!(handle.session().consumer_count(), 1);
        assert!(!handle.session().is_destroyed());
    }

    #[test]
    fn removal_retracts_id_and_fails_held_handles_with_device_gone() {
        let registry = DeviceRegistry::default();
        let (id, mock) = arrive(&registry);
        let handle = registry.open(id).unwrap();
        let calls_before = mock.control_calls().len();

        assert!(registry.on_removal(id));

        assert!(matches!(registry.open(id), Err(AmbaError::NotFound(_))));
        assert!(matches!(handle.send_command(&AmbaRequest::BootDsp), Err(AmbaError::DeviceGone)));
        assert_eq!(mock.control_calls().len(), calls_before);
        assert!(!registry.on_removal(id));
    }

    #[test]
    fn session_is_destroyed_exactly_once_after_removal_and_last_close() {
        let registry = DeviceRegistry::default();
        let mut events = registry.subscribe();
        let (id, _) = arrive(&registry);
        let first = registry.open(id).unwrap();
        let second = registry.open(id).unwrap();

        registry.on_removal(id);
        first.close();
        assert!(!drain(&mut events).contains(&DeviceEvent::Destroyed(id)));
        second.close();

        let destroyed = drain(&mut events).into_iter().filter(|event| *event == DeviceEvent::Destroyed(id)).count();
        assert_eq!(destroyed, 1);
    }

    #[test]
    fn removal_without_consumers_destroys_immediately() {
        let registry = DeviceRegistry::default();
        let mut events = registry.subscribe();
        let (id, _) = arrive(&registry);

        registry.on_removal(id);

        assert_eq!(drain(&mut events), vec![DeviceEvent::Added(id), DeviceEvent::Removed(id), DeviceEvent::Destroyed(id)]);
    }

    #[test]
    fn concurrent_open_and_removal_never_yield_a_working_handle() {
        for _ in 0..200 {
            let registry = Arc::new(DeviceRegistry::default());
            let (id, _) = arrive(&registry);
            let barrier = Arc::new(Barrier::new(2));

            let opener = {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.open(id)
                })
            };
            let remover = {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.on_removal(id)
                })
            };

            let opened = opener.join().unwrap();
            assert!(remover.join().unwrap());
            match opened {
                Ok(handle) => {
                    assert!(matches!(handle.send_command(&AmbaRequest::BootDsp), Err(AmbaError::DeviceGone)));
                    assert!(!handle.session().is_destroyed());
                    let session = Arc::clone(&handle.session);
                    handle.close();
                    assert!(session.is_destroyed());
                }
                Err(e) => assert!(matches!(e, AmbaError::NotFound(_))),
            }
        }
    }

    #[test]
    fn remove_all_invalidates_every_session() {
        let registry = DeviceRegistry::default();
        let (first, _) = arrive(&registry);
        let (second, _) = arrive(&registry);
        let handle = registry.open(second).unwrap();

        let mut removed = registry.remove_all();
        removed.sort();

        assert_eq!(removed, vec![first, second]);
        assert!(registry.session_ids().is_empty());
        assert!(matches!(handle.send_command(&AmbaRequest::BootDsp), Err(AmbaError::DeviceGone)));
    }
}
