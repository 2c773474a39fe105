//! Presentation layer contract
//!
//! Callbacks invoked by the sessions. Implementations must not block; the
//! channel implementation below only enqueues.

use crate::domain::models::{
    AppEvent, ConnectionState, ErrorKind, PeripheralIdentity, ScanState, TelemetryRecord,
};
use tokio::sync::mpsc;

pub trait EventSink: Send + Sync {
    fn on_device_discovered(&self, device: &PeripheralIdentity);

    fn on_scan_finished(&self, state: &ScanState, devices_found: usize);

    fn on_connection_state_changed(&self, device: &PeripheralIdentity, state: ConnectionState);

    fn on_telemetry(&self, record: &TelemetryRecord);

    fn on_error(&self, kind: ErrorKind, message: &str);
}

impl EventSink for mpsc::UnboundedSender<AppEvent> {
    fn on_device_discovered(&self, device: &PeripheralIdentity) {
        let _ = self.send(AppEvent::DeviceDiscovered(device.clone()));
    }

    fn on_scan_finished(&self, state: &ScanState, devices_found: usize) {
        let _ = self.send(AppEvent::ScanFinished {
            state: state.clone(),
            devices_found,
        });
    }

    fn on_connection_state_changed(&self, device: &PeripheralIdentity, state: ConnectionState) {
        let _ = self.send(AppEvent::ConnectionState {
            device: device.clone(),
            state,
        });
    }

    fn on_telemetry(&self, record: &TelemetryRecord) {
        let _ = self.send(AppEvent::Telemetry(record.clone()));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        let _ = self.send(AppEvent::Error {
            kind,
            message: message.to_string(),
        });
    }
}
