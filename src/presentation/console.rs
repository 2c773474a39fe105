//! Console front end
//!
//! Logs every event and picks a device to connect to: the first one matching
//! the preferred name or the last connected id as soon as it shows up, or the
//! first discovered one once the scan is over.

use crate::domain::models::{
    AppEvent, BluetoothCommand, ConnectionState, MessageSeverity, PeripheralId,
    PeripheralIdentity, ScanState,
};
use tracing::{error, info, warn};

pub struct ConsolePresenter {
    preferred_name: Option<String>,
    last_connected: Option<PeripheralId>,
    discovered: Vec<PeripheralIdentity>,
    target: Option<PeripheralId>,
}

impl ConsolePresenter {
    pub fn new(preferred_name: Option<String>, last_connected: Option<PeripheralId>) -> Self {
        Self {
            preferred_name: preferred_name
                .map(|name| name.trim().to_lowercase())
                .filter(|name| !name.is_empty()),
            last_connected,
            discovered: Vec::new(),
            target: None,
        }
    }

    pub fn target(&self) -> Option<&PeripheralId> {
        self.target.as_ref()
    }

    fn is_preferred(&self, device: &PeripheralIdentity) -> bool {
        if self.last_connected.as_ref() == Some(&device.id) {
            return true;
        }
        match (&self.preferred_name, &device.display_name) {
            (Some(preferred), Some(name)) => name.to_lowercase().contains(preferred.as_str()),
            _ => false,
        }
    }

    fn select(&mut self, device: &PeripheralIdentity) -> BluetoothCommand {
        info!("Connecting to {} ({})", device.label(), device.id);
        self.target = Some(device.id.clone());
        BluetoothCommand::Connect(device.id.clone())
    }

    /// Render one event and return the commands it triggers.
    pub fn handle(&mut self, event: AppEvent) -> Vec<BluetoothCommand> {
        match event {
            AppEvent::DeviceDiscovered(device) => {
                info!("Discovered {} ({})", device.label(), device.id);
                let mut commands = Vec::new();
                if self.target.is_none() && self.is_preferred(&device) {
                    commands.push(BluetoothCommand::StopScan);
                    commands.push(self.select(&device));
                }
                self.discovered.push(device);
                commands
            }
            AppEvent::ScanFinished {
                state,
                devices_found,
            } => {
                info!("Scan finished: {:?}, {} device(s)", state, devices_found);
                if self.target.is_some() || matches!(state, ScanState::Errored(_)) {
                    return Vec::new();
                }
                match self.discovered.first().cloned() {
                    Some(first) => vec![self.select(&first)],
                    None => Vec::new(),
                }
            }
            AppEvent::ConnectionState { device, state } => {
                match state {
                    ConnectionState::Failed(reason) => {
                        warn!("{}: connection failed ({})", device.label(), reason)
                    }
                    ConnectionState::Streaming => info!("{}: streaming telemetry", device.label()),
                    other => info!("{}: {:?}", device.label(), other),
                }
                Vec::new()
            }
            AppEvent::Telemetry(record) => {
                info!("{}", record);
                Vec::new()
            }
            AppEvent::Error { kind, message } => {
                match kind.severity() {
                    MessageSeverity::Warning => warn!("{:?}: {}", kind, message),
                    MessageSeverity::Error => error!("{:?}: {}", kind, message),
                }
                Vec::new()
            }
        }
    }
}
