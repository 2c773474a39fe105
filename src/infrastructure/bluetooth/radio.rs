//! Radio capability
//!
//! The platform BLE stack as seen by the sessions. Implementations deliver
//! discovery events and notification frames through channels fed from their
//! own tasks, so callers never block the context that produces events.

use crate::domain::models::{PeripheralId, PeripheralIdentity};
use crate::error::RadioError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    On,
    Off,
    Unknown,
}

/// One advertisement seen while scanning.
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
    pub identity: PeripheralIdentity,
    /// Advertised local name as received, before any cleanup
    pub raw_name: Option<String>,
}

/// A characteristic advertised by a connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub notifiable: bool,
}

/// Resolved telemetry endpoint on one connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointHandle {
    peripheral: PeripheralId,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
}

impl EndpointHandle {
    pub fn new(peripheral: PeripheralId, descriptor: &EndpointDescriptor) -> Self {
        Self {
            peripheral,
            service_uuid: descriptor.service_uuid,
            characteristic_uuid: descriptor.characteristic_uuid,
        }
    }

    pub fn peripheral(&self) -> &PeripheralId {
        &self.peripheral
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    pub fn characteristic_uuid(&self) -> Uuid {
        self.characteristic_uuid
    }
}

/// Discovery events in arrival order. An `Err` item ends the scan.
pub type DiscoveryStream = mpsc::UnboundedReceiver<Result<DiscoveryEvent, RadioError>>;

/// Notification frames in arrival order. An `Err` item or channel close means
/// the link is gone.
pub type NotificationStream = mpsc::UnboundedReceiver<Result<Vec<u8>, RadioError>>;

#[async_trait]
pub trait Radio: Send + Sync {
    async fn adapter_state(&self) -> AdapterState;

    async fn start_scan(&self) -> Result<DiscoveryStream, RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), RadioError>;

    async fn enumerate_endpoints(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Vec<EndpointDescriptor>, RadioError>;

    async fn subscribe(&self, endpoint: &EndpointHandle)
        -> Result<NotificationStream, RadioError>;

    async fn unsubscribe(&self, endpoint: &EndpointHandle) -> Result<(), RadioError>;

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), RadioError>;
}
