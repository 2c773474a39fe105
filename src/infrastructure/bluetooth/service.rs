//! Bluetooth Service Module
//!
//! Owns the scan session and the single connection session, routes commands
//! from the presentation layer, and forwards session events back to it.

use crate::domain::models::{
    BluetoothCommand, ConnectionState, ErrorKind, PeripheralId, PeripheralIdentity, ScanState,
    SessionConfig, TelemetryRecord,
};
use crate::domain::registry::DeviceRegistry;
use crate::error::SessionError;
use crate::infrastructure::bluetooth::connection::ConnectionSession;
use crate::infrastructure::bluetooth::radio::Radio;
use crate::infrastructure::bluetooth::scanner::ScanSession;
use crate::presentation::sink::EventSink;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const NO_DEVICES_MESSAGE: &str = "No devices found. Try again.";

/// Forwards everything unchanged and adds the empty-scan notice.
struct ControllerSink {
    inner: Arc<dyn EventSink>,
}

impl EventSink for ControllerSink {
    fn on_device_discovered(&self, device: &PeripheralIdentity) {
        self.inner.on_device_discovered(device);
    }

    fn on_scan_finished(&self, state: &ScanState, devices_found: usize) {
        self.inner.on_scan_finished(state, devices_found);
        if *state == ScanState::TimedOut && devices_found == 0 {
            self.inner.on_error(ErrorKind::NoDevicesFound, NO_DEVICES_MESSAGE);
        }
    }

    fn on_connection_state_changed(&self, device: &PeripheralIdentity, state: ConnectionState) {
        self.inner.on_connection_state_changed(device, state);
    }

    fn on_telemetry(&self, record: &TelemetryRecord) {
        self.inner.on_telemetry(record);
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.inner.on_error(kind, message);
    }
}

/// Main Bluetooth service coordinating all BLE operations
pub struct DeviceSessionController {
    radio: Arc<dyn Radio>,
    sink: Arc<dyn EventSink>,
    registry: Arc<DeviceRegistry>,
    scanner: ScanSession,
    connection: Option<ConnectionSession>,
    config: SessionConfig,
}

impl DeviceSessionController {
    pub fn new(radio: Arc<dyn Radio>, sink: Arc<dyn EventSink>, config: SessionConfig) -> Self {
        let sink: Arc<dyn EventSink> = Arc::new(ControllerSink { inner: sink });
        let registry = Arc::new(DeviceRegistry::new());
        let scanner = ScanSession::new(
            radio.clone(),
            registry.clone(),
            sink.clone(),
            config.teardown_timeout,
        );

        Self {
            radio,
            sink,
            registry,
            scanner,
            connection: None,
            config,
        }
    }

    /// Start scanning for devices
    pub async fn start_scan(&mut self) -> Result<(), SessionError> {
        self.scanner.start(self.config.scan_timeout).await
    }

    /// Stop scanning
    pub async fn stop_scan(&mut self) -> ScanState {
        self.scanner.stop().await
    }

    pub fn scan_state(&self) -> ScanState {
        self.scanner.state()
    }

    pub fn discovered_devices(&self) -> Vec<PeripheralIdentity> {
        self.registry.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map(ConnectionSession::state)
            .unwrap_or_default()
    }

    pub fn connected_device(&self) -> Option<&PeripheralIdentity> {
        self.connection.as_ref().map(ConnectionSession::device)
    }

    /// Connect to a device from the current discovery list.
    pub async fn connect_by_id(&mut self, id: &PeripheralId) -> Result<(), SessionError> {
        let device = self
            .registry
            .get(id)
            .ok_or_else(|| SessionError::UnknownDevice(id.clone()))?;
        self.request_connect(device).await
    }

    /// Connect to `device`, tearing down any existing session first.
    pub async fn request_connect(
        &mut self,
        device: PeripheralIdentity,
    ) -> Result<(), SessionError> {
        if let Some(current) = &self.connection {
            if current.device() == &device && current.state() == ConnectionState::Streaming {
                info!("Device already connected.");
                return Err(SessionError::AlreadyConnected(device.id));
            }
        }

        if let Some(mut previous) = self.connection.take() {
            info!(
                "Replacing connection to {} with {}",
                previous.device().label(),
                device.label()
            );
            previous.close().await;
        }

        let mut session =
            ConnectionSession::new(device, self.radio.clone(), self.sink.clone(), &self.config);
        let result = session.open().await;
        self.connection = Some(session);
        result
    }

    /// Disconnect from the current device
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        match self.connection.take() {
            Some(mut session) => {
                session.close().await;
                Ok(())
            }
            None => Err(SessionError::NotConnected),
        }
    }

    /// Stop scanning and release the connection.
    pub async fn shutdown(&mut self) {
        self.scanner.stop().await;
        if let Some(mut session) = self.connection.take() {
            session.close().await;
        }
    }

    pub async fn handle_command(&mut self, command: BluetoothCommand) -> Result<(), SessionError> {
        match command {
            BluetoothCommand::StartScan => self.start_scan().await,
            BluetoothCommand::StopScan => {
                self.stop_scan().await;
                Ok(())
            }
            BluetoothCommand::Connect(id) => self.connect_by_id(&id).await,
            BluetoothCommand::Disconnect => self.disconnect().await,
            BluetoothCommand::Shutdown => {
                self.shutdown().await;
                Ok(())
            }
        }
    }

    /// Process commands in order until `Shutdown` or the sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BluetoothCommand>) {
        info!("Bluetooth command loop started");
        while let Some(command) = commands.recv().await {
            debug!("Bluetooth command: {:?}", command);
            if command == BluetoothCommand::Shutdown {
                break;
            }
            if let Err(e) = self.handle_command(command).await {
                warn!("Command failed: {}", e);
                self.sink.on_error(e.kind(), &e.to_string());
            }
        }

        self.shutdown().await;
        info!("Bluetooth command loop stopped");
    }
}
