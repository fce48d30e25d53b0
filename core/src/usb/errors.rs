use std::io;
use thiserror::Error;
use crate::config::BringUpStep;
use crate::device_manager::SessionId;

/// Failure reported by a [`UsbTransport`](crate::usb::transport::UsbTransport) call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transfer timed out")]
    Timeout,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Endpoint stalled")]
    Stall,

    #[error("Transfer failed: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum AmbaError {
    #[error("Device is gone")]
    DeviceGone,

    #[error("Transferred {actual} bytes, expected {expected}")]
    TransferMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("Transfer timed out")]
    Timeout,

    #[error("Session {0} not found")]
    NotFound(SessionId),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Protocol misuse: {0}")]
    ProtocolMisuse(String),

    #[error("Value {value} out of range for {name}: expected {min}..={max}")]
    ValueOutOfRange {
        name: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Critical bring-up step {step:?} failed: {source}")]
    BringUpFailed {
        step: BringUpStep,
        #[source]
        source: Box<AmbaError>,
    },
}

impl AmbaError {
    /// Whether the caller may retry or continue after this error.
    ///
    /// `ProtocolMisuse` marks a defect in the caller and is never recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AmbaError::DeviceGone
                | AmbaError::Timeout
                | AmbaError::TransferMismatch { .. }
                | AmbaError::NotFound(_)
        )
    }
}

impl From<TransportError> for AmbaError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout => AmbaError::Timeout,
            TransportError::Disconnected => AmbaError::DeviceGone,
            TransportError::Stall => AmbaError::Transfer("endpoint stalled".to_string()),
            TransportError::Other(message) => AmbaError::Transfer(message),
        }
    }
}

impl From<AmbaError> for io::Error {
    fn from(error: AmbaError) -> Self {
        let kind = match &error {
            AmbaError::DeviceGone | AmbaError::NotFound(_) => io::ErrorKind::NotConnected,
            AmbaError::Timeout => io::ErrorKind::TimedOut,
            AmbaError::ResourceExhausted(_) => io::ErrorKind::OutOfMemory,
            AmbaError::TransferMismatch { .. } => io::ErrorKind::InvalidData,
            AmbaError::ValueOutOfRange { .. } | AmbaError::ProtocolMisuse(_) => io::ErrorKind::InvalidInput,
            AmbaError::Transfer(_) | AmbaError::BringUpFailed { .. } => io::ErrorKind::Other,
        };
        io::Error::new(kind, error)
    }
}

#[derive(Error, Debug)]
pub enum DeviceDiscoveryError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Device {vendor_id:04x}:{product_id:04x} is not an Amba encoder")]
    NotAmbaDevice {
        vendor_id: u16,
        product_id: u16,
    },

    #[error("Streaming interface not found")]
    InterfaceNotFound,

    #[error("Device initialization failed: {0}")]
    Amba(#[from] AmbaError),
}
