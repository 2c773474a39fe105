//! Radio capability on top of `bluest` (WinRT, CoreBluetooth, BlueZ).
//!
//! Scan and notification streams borrow bluest objects, so each one is driven
//! by its own task that owns a clone and forwards into an mpsc channel.

use crate::domain::models::{PeripheralId, PeripheralIdentity};
use crate::error::RadioError;
use crate::infrastructure::bluetooth::radio::{
    AdapterState, DiscoveryEvent, DiscoveryStream, EndpointDescriptor, EndpointHandle,
    NotificationStream, Radio,
};
use anyhow::anyhow;
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn transport(e: bluest::Error) -> RadioError {
    RadioError::Transport(e.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BluestRadio {
    adapter: Adapter,
    /// Devices seen while scanning, by id
    devices: Arc<Mutex<HashMap<PeripheralId, Device>>>,
    characteristics: Mutex<HashMap<EndpointHandle, Characteristic>>,
    scan_cancel: Mutex<Option<CancellationToken>>,
    notify_cancel: Mutex<HashMap<EndpointHandle, CancellationToken>>,
}

impl BluestRadio {
    pub async fn new() -> anyhow::Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        info!("Bluetooth adapter found.");

        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            characteristics: Mutex::new(HashMap::new()),
            scan_cancel: Mutex::new(None),
            notify_cancel: Mutex::new(HashMap::new()),
        })
    }

    fn device(&self, id: &PeripheralId) -> Result<Device, RadioError> {
        lock(&self.devices)
            .get(id)
            .cloned()
            .ok_or_else(|| RadioError::UnknownPeripheral(id.clone()))
    }

    async fn internal_scan_task(
        adapter: Adapter,
        devices: Arc<Mutex<HashMap<PeripheralId, Device>>>,
        events: mpsc::UnboundedSender<Result<DiscoveryEvent, RadioError>>,
        ready: oneshot::Sender<Result<(), RadioError>>,
        cancel_token: CancellationToken,
    ) {
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => {
                let _ = ready.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to start bluetooth scan: {}", e);
                let _ = ready.send(Err(transport(e)));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                result = scan_stream.next() => match result {
                    Some(discovered) => {
                        let device = discovered.device;
                        let id = PeripheralId::new(device.id().to_string());
                        let raw_name = discovered
                            .adv_data
                            .local_name
                            .clone()
                            .or_else(|| device.name().ok());
                        debug!("Found device - ID: {}, RSSI: {:?}", id, discovered.rssi);

                        lock(&devices).insert(id.clone(), device);
                        let event = DiscoveryEvent {
                            identity: PeripheralIdentity::new(id, raw_name.clone()),
                            raw_name,
                        };
                        if events.send(Ok(event)).is_err() {
                            break;
                        }
                    }
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    }
                }
            }
        }
        debug!("Scan task finished");
    }

    async fn process_notifications(
        characteristic: Characteristic,
        frames: mpsc::UnboundedSender<Result<Vec<u8>, RadioError>>,
        ready: oneshot::Sender<Result<(), RadioError>>,
        cancel_token: CancellationToken,
    ) {
        let mut notification_stream = match characteristic.notify().await {
            Ok(stream) => {
                let _ = ready.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                let _ = ready.send(Err(transport(e)));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                result = notification_stream.next() => match result {
                    Some(Ok(value)) => {
                        if frames.send(Ok(value)).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = frames.send(Err(transport(e)));
                        break;
                    }
                    None => break,
                }
            }
        }
        debug!("Notification task for {} finished", characteristic.uuid());
    }
}

#[async_trait]
impl Radio for BluestRadio {
    async fn adapter_state(&self) -> AdapterState {
        match self.adapter.is_available().await {
            Ok(true) => AdapterState::On,
            Ok(false) => AdapterState::Off,
            Err(e) => {
                warn!("Could not query adapter state: {}", e);
                AdapterState::Unknown
            }
        }
    }

    async fn start_scan(&self) -> Result<DiscoveryStream, RadioError> {
        let cancel_token = CancellationToken::new();
        if let Some(previous) = lock(&self.scan_cancel).replace(cancel_token.clone()) {
            previous.cancel();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(Self::internal_scan_task(
            self.adapter.clone(),
            self.devices.clone(),
            tx,
            ready_tx,
            cancel_token,
        ));

        ready_rx
            .await
            .unwrap_or_else(|_| Err(RadioError::Transport("scan task ended".to_string())))?;
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        if let Some(cancel_token) = lock(&self.scan_cancel).take() {
            cancel_token.cancel();
        }
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), RadioError> {
        let device = self.device(peripheral)?;
        if !device.is_connected().await {
            info!("Initiating connection to {}...", peripheral);
            self.adapter
                .connect_device(&device)
                .await
                .map_err(transport)?;
        }
        Ok(())
    }

    async fn enumerate_endpoints(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Vec<EndpointDescriptor>, RadioError> {
        let device = self.device(peripheral)?;
        let services = device.services().await.map_err(transport)?;

        let mut descriptors = Vec::new();
        let mut resolved = HashMap::new();
        for service in services {
            for characteristic in service.characteristics().await.map_err(transport)? {
                let notifiable = match characteristic.properties().await {
                    Ok(properties) => properties.notify || properties.indicate,
                    Err(e) => {
                        debug!("Could not read properties of {}: {}", characteristic.uuid(), e);
                        false
                    }
                };
                let descriptor = EndpointDescriptor {
                    service_uuid: service.uuid(),
                    characteristic_uuid: characteristic.uuid(),
                    notifiable,
                };
                resolved.insert(
                    EndpointHandle::new(peripheral.clone(), &descriptor),
                    characteristic,
                );
                descriptors.push(descriptor);
            }
        }

        lock(&self.characteristics).extend(resolved);
        Ok(descriptors)
    }

    async fn subscribe(
        &self,
        endpoint: &EndpointHandle,
    ) -> Result<NotificationStream, RadioError> {
        let characteristic = lock(&self.characteristics)
            .get(endpoint)
            .cloned()
            .ok_or_else(|| {
                RadioError::Transport(format!(
                    "characteristic {} was not discovered",
                    endpoint.characteristic_uuid()
                ))
            })?;

        let cancel_token = CancellationToken::new();
        if let Some(previous) =
            lock(&self.notify_cancel).insert(endpoint.clone(), cancel_token.clone())
        {
            previous.cancel();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(Self::process_notifications(
            characteristic,
            tx,
            ready_tx,
            cancel_token,
        ));

        ready_rx.await.unwrap_or_else(|_| {
            Err(RadioError::Transport("notification task ended".to_string()))
        })?;
        Ok(rx)
    }

    async fn unsubscribe(&self, endpoint: &EndpointHandle) -> Result<(), RadioError> {
        if let Some(cancel_token) = lock(&self.notify_cancel).remove(endpoint) {
            cancel_token.cancel();
        }
        lock(&self.characteristics).remove(endpoint);
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), RadioError> {
        lock(&self.notify_cancel).retain(|endpoint, cancel_token| {
            if endpoint.peripheral() == peripheral {
                cancel_token.cancel();
                false
            } else {
                true
            }
        });
        lock(&self.characteristics).retain(|endpoint, _| endpoint.peripheral() != peripheral);

        let device = self.device(peripheral)?;
        if device.is_connected().await {
            info!("Disconnecting from device {}", peripheral);
            self.adapter
                .disconnect_device(&device)
                .await
                .map_err(transport)?;
        } else {
            info!("Device {} not connected", peripheral);
        }
        Ok(())
    }
}
