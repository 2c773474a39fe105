//! Error types for decoding, the radio capability, and session commands.

use crate::domain::models::{ErrorKind, PeripheralId};
use thiserror::Error;
use uuid::Uuid;

/// Per-frame payload failure. Never fatal to a session.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),
    #[error("payload is not a telemetry object: {0}")]
    MalformedStructure(#[from] serde_json::Error),
}

impl DecodeError {
    pub fn is_invalid_encoding(&self) -> bool {
        matches!(self, Self::InvalidEncoding(_))
    }

    pub fn is_malformed_structure(&self) -> bool {
        matches!(self, Self::MalformedStructure(_))
    }
}

/// Failures reported by the platform radio stack.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RadioError {
    #[error("Bluetooth adapter is unavailable")]
    Unavailable,
    #[error("unknown peripheral: {0}")]
    UnknownPeripheral(PeripheralId),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outcome of a scan/connection command.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Bluetooth is off, turn it on and try again")]
    RadioUnavailable,
    #[error("a scan is already running")]
    AlreadyScanning,
    #[error("already connected to {0}")]
    AlreadyConnected(PeripheralId),
    #[error("device {0} is not in the discovered list")]
    UnknownDevice(PeripheralId),
    #[error("no device is connected")]
    NotConnected,
    #[error("failed to start scan: {0}")]
    ScanFailed(#[source] RadioError),
    #[error("failed to connect to {device}: {source}")]
    ConnectFailed {
        device: PeripheralId,
        #[source]
        source: RadioError,
    },
    #[error("endpoint {service}/{characteristic} not found on {device}")]
    EndpointNotFound {
        device: PeripheralId,
        service: Uuid,
        characteristic: Uuid,
    },
    #[error("failed to subscribe on {device}: {source}")]
    SubscribeFailed {
        device: PeripheralId,
        #[source]
        source: RadioError,
    },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RadioUnavailable => ErrorKind::RadioUnavailable,
            Self::AlreadyScanning => ErrorKind::AlreadyScanning,
            Self::AlreadyConnected(_) => ErrorKind::AlreadyConnected,
            Self::UnknownDevice(_) => ErrorKind::UnknownDevice,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::ScanFailed(_) => ErrorKind::ScanFailed,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::EndpointNotFound { .. } => ErrorKind::EndpointNotFound,
            Self::SubscribeFailed { .. } => ErrorKind::SubscribeFailed,
        }
    }
}
