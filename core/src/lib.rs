pub mod usb;
pub mod definitions;
pub mod config;
pub mod device_manager;
pub mod control;
pub mod stream_reader;
pub mod service;

mod usb_device_watch;

pub use usb_device_watch::run_usb_device_watch;
pub use service::{spawn_service, ServiceHandle, StopHandle};
pub use config::{AmbaConfig, BringUpStep, BringUpSteps};
pub use device_manager::{DeviceEvent, DeviceRegistry, SessionHandle, SessionId, SessionRegistry};
pub use usb::errors::AmbaError;
pub use stream_reader::MAX_STREAM_TRANSFER;
