//! Scripted in-memory radio for session tests.

use crate::domain::models::{EndpointConfig, PeripheralId, PeripheralIdentity};
use crate::error::RadioError;
use crate::infrastructure::bluetooth::radio::{
    AdapterState, DiscoveryEvent, DiscoveryStream, EndpointDescriptor, EndpointHandle,
    NotificationStream, Radio,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RadioCall {
    StartScan,
    StopScan,
    Connect(PeripheralId),
    EnumerateEndpoints(PeripheralId),
    Subscribe(PeripheralId),
    Unsubscribe(PeripheralId),
    Disconnect(PeripheralId),
}

struct MockState {
    adapter: AdapterState,
    calls: Vec<RadioCall>,
    discovery_tx: Option<mpsc::UnboundedSender<Result<DiscoveryEvent, RadioError>>>,
    endpoints: HashMap<PeripheralId, Vec<EndpointDescriptor>>,
    links: HashMap<PeripheralId, mpsc::UnboundedSender<Result<Vec<u8>, RadioError>>>,
    failing_connects: HashSet<PeripheralId>,
    fail_start_scan: bool,
    fail_subscribe: bool,
    hang_connect: bool,
    hang_enumerate: bool,
    hang_subscribe: bool,
    hang_stop_scan: bool,
    hang_disconnect: bool,
    fail_teardown: bool,
}

pub(crate) struct MockRadio {
    state: Mutex<MockState>,
}

impl MockRadio {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                adapter: AdapterState::On,
                calls: Vec::new(),
                discovery_tx: None,
                endpoints: HashMap::new(),
                links: HashMap::new(),
                failing_connects: HashSet::new(),
                fail_start_scan: false,
                fail_subscribe: false,
                hang_connect: false,
                hang_enumerate: false,
                hang_subscribe: false,
                hang_stop_scan: false,
                hang_disconnect: false,
                fail_teardown: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_adapter(&self, adapter: AdapterState) {
        self.lock().adapter = adapter;
    }

    /// Give `id` the telemetry endpoint plus an unrelated one.
    pub(crate) fn add_wearable(&self, id: &str, endpoint: &EndpointConfig) {
        self.set_endpoints(
            id,
            vec![
                EndpointDescriptor {
                    service_uuid: Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb),
                    characteristic_uuid: Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb),
                    notifiable: true,
                },
                EndpointDescriptor {
                    service_uuid: endpoint.service_uuid,
                    characteristic_uuid: endpoint.characteristic_uuid,
                    notifiable: true,
                },
            ],
        );
    }

    pub(crate) fn set_endpoints(&self, id: &str, endpoints: Vec<EndpointDescriptor>) {
        self.lock().endpoints.insert(PeripheralId::new(id), endpoints);
    }

    pub(crate) fn fail_connect(&self, id: &str) {
        self.lock().failing_connects.insert(PeripheralId::new(id));
    }

    pub(crate) fn fail_start_scan(&self) {
        self.lock().fail_start_scan = true;
    }

    pub(crate) fn fail_subscribe(&self) {
        self.lock().fail_subscribe = true;
    }

    pub(crate) fn hang_connect(&self) {
        self.lock().hang_connect = true;
    }

    pub(crate) fn hang_enumerate(&self) {
        self.lock().hang_enumerate = true;
    }

    pub(crate) fn hang_subscribe(&self) {
        self.lock().hang_subscribe = true;
    }

    pub(crate) fn hang_stop_scan(&self) {
        self.lock().hang_stop_scan = true;
    }

    pub(crate) fn hang_disconnect(&self) {
        self.lock().hang_disconnect = true;
    }

    pub(crate) fn fail_teardown(&self) {
        self.lock().fail_teardown = true;
    }

    /// Deliver an advertisement to the running scan. Returns false if none is running.
    pub(crate) fn advertise(&self, id: &str, name: Option<&str>) -> bool {
        let event = DiscoveryEvent {
            identity: PeripheralIdentity::new(id, name.map(str::to_string)),
            raw_name: name.map(str::to_string),
        };
        match &self.lock().discovery_tx {
            Some(tx) => tx.send(Ok(event)).is_ok(),
            None => false,
        }
    }

    pub(crate) fn scan_error(&self, message: &str) -> bool {
        match &self.lock().discovery_tx {
            Some(tx) => tx.send(Err(RadioError::Transport(message.to_string()))).is_ok(),
            None => false,
        }
    }

    /// Deliver a notification frame on the subscribed link of `id`.
    pub(crate) fn push_frame(&self, id: &str, frame: &[u8]) -> bool {
        match self.lock().links.get(&PeripheralId::new(id)) {
            Some(tx) => tx.send(Ok(frame.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Simulate the peripheral going out of range.
    pub(crate) fn drop_link(&self, id: &str) {
        if let Some(tx) = self.lock().links.remove(&PeripheralId::new(id)) {
            let _ = tx.send(Err(RadioError::Transport("link lost".to_string())));
        }
    }

    pub(crate) fn calls(&self) -> Vec<RadioCall> {
        self.lock().calls.clone()
    }

    fn record(&self, call: RadioCall) -> MutexGuard<'_, MockState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn adapter_state(&self) -> AdapterState {
        self.lock().adapter
    }

    async fn start_scan(&self) -> Result<DiscoveryStream, RadioError> {
        let mut state = self.record(RadioCall::StartScan);
        if state.fail_start_scan {
            return Err(RadioError::Transport("scan refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.discovery_tx = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        let hang = {
            let mut state = self.record(RadioCall::StopScan);
            state.discovery_tx = None;
            state.hang_stop_scan
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), RadioError> {
        let hang = {
            let state = self.record(RadioCall::Connect(peripheral.clone()));
            if state.failing_connects.contains(peripheral) {
                return Err(RadioError::Transport("connection refused".to_string()));
            }
            state.hang_connect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn enumerate_endpoints(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Vec<EndpointDescriptor>, RadioError> {
        let (hang, endpoints) = {
            let state = self.record(RadioCall::EnumerateEndpoints(peripheral.clone()));
            let endpoints = state.endpoints.get(peripheral).cloned().unwrap_or_default();
            (state.hang_enumerate, endpoints)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(endpoints)
    }

    async fn subscribe(
        &self,
        endpoint: &EndpointHandle,
    ) -> Result<NotificationStream, RadioError> {
        let hang = {
            let state = self.record(RadioCall::Subscribe(endpoint.peripheral().clone()));
            if state.fail_subscribe {
                return Err(RadioError::Transport("CCCD write rejected".to_string()));
            }
            state.hang_subscribe
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().links.insert(endpoint.peripheral().clone(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, endpoint: &EndpointHandle) -> Result<(), RadioError> {
        let mut state = self.record(RadioCall::Unsubscribe(endpoint.peripheral().clone()));
        state.links.remove(endpoint.peripheral());
        if state.fail_teardown {
            return Err(RadioError::Transport("not connected".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), RadioError> {
        let hang = {
            let mut state = self.record(RadioCall::Disconnect(peripheral.clone()));
            state.links.remove(peripheral);
            if state.fail_teardown {
                return Err(RadioError::Transport("not connected".to_string()));
            }
            state.hang_disconnect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
