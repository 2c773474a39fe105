//! BLE Connection Module
//!
//! Lifecycle of the single link to a wearable: connect, resolve the telemetry
//! endpoint, subscribe, stream decoded frames, tear down.

use crate::domain::models::{
    ConnectionState, EndpointConfig, ErrorKind, FailureReason, PeripheralIdentity, SessionConfig,
};
use crate::error::{RadioError, SessionError};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::radio::{EndpointHandle, NotificationStream, Radio};
use crate::presentation::sink::EventSink;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Serialization point for state transitions. Every change is forwarded to the
/// sink while the lock is held, so observers see transitions in order.
struct StateCell {
    device: PeripheralIdentity,
    current: Mutex<ConnectionState>,
    sink: Arc<dyn EventSink>,
}

impl StateCell {
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self) -> ConnectionState {
        *self.lock()
    }

    fn set(&self, next: ConnectionState) {
        let mut current = self.lock();
        if *current == next {
            return;
        }
        debug!(device = %self.device.id, "Connection state {:?} -> {:?}", *current, next);
        *current = next;
        self.sink.on_connection_state_changed(&self.device, next);
    }

    /// Mark the link lost, unless the session already left `Streaming`.
    fn link_lost(&self, detail: &str) {
        let mut current = self.lock();
        if *current != ConnectionState::Streaming {
            return;
        }
        *current = ConnectionState::Failed(FailureReason::TransportDropped);
        self.sink.on_connection_state_changed(&self.device, *current);
        self.sink.on_error(
            ErrorKind::TransportDropped,
            &format!("Lost connection to {}: {}", self.device.label(), detail),
        );
    }
}

/// Run a radio call with a bound, mapping expiry to [`RadioError::Timeout`].
async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, RadioError>>,
) -> Result<T, RadioError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(RadioError::Timeout(operation)))
}

pub struct ConnectionSession {
    radio: Arc<dyn Radio>,
    state: Arc<StateCell>,
    endpoint_config: EndpointConfig,
    operation_timeout: Duration,
    teardown_timeout: Duration,
    endpoint: Option<EndpointHandle>,
    link_open: bool,
    cancel_token: CancellationToken,
    stream_task: Option<JoinHandle<()>>,
}

impl ConnectionSession {
    pub fn new(
        device: PeripheralIdentity,
        radio: Arc<dyn Radio>,
        sink: Arc<dyn EventSink>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            radio,
            state: Arc::new(StateCell {
                device,
                current: Mutex::new(ConnectionState::Idle),
                sink,
            }),
            endpoint_config: config.endpoint,
            operation_timeout: config.operation_timeout,
            teardown_timeout: config.teardown_timeout,
            endpoint: None,
            link_open: false,
            cancel_token: CancellationToken::new(),
            stream_task: None,
        }
    }

    pub fn device(&self) -> &PeripheralIdentity {
        &self.state.device
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn endpoint(&self) -> Option<&EndpointHandle> {
        self.endpoint.as_ref()
    }

    /// Connect, resolve the endpoint and subscribe. Single attempt: any
    /// failure leaves the session in `Failed` with the link released.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        let id = self.state.device.id.clone();
        info!(device = %id, "Connecting to {}...", self.state.device.label());

        // Step 1: Connect
        self.state.set(ConnectionState::Connecting);
        if let Err(e) = bounded(self.operation_timeout, "connect", self.radio.connect(&id)).await {
            error!(device = %id, "Connection failed: {}", e);
            if matches!(e, RadioError::Timeout(_)) {
                // The abandoned connect may still complete on the radio side.
                self.link_open = true;
                self.release_link().await;
            }
            self.state
                .set(ConnectionState::Failed(FailureReason::ConnectFailed));
            return Err(SessionError::ConnectFailed {
                device: id,
                source: e,
            });
        }
        self.link_open = true;

        // Step 2: Resolve the telemetry endpoint
        self.state.set(ConnectionState::EndpointDiscovery);
        let endpoint = match self.resolve_endpoint().await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(device = %id, "{}", e);
                self.release_link().await;
                self.state
                    .set(ConnectionState::Failed(FailureReason::EndpointNotFound));
                return Err(e);
            }
        };

        // Step 3: Subscribe
        self.state.set(ConnectionState::Subscribing);
        info!(device = %id, "Subscribing to notifications...");
        let frames = match bounded(
            self.operation_timeout,
            "subscribe",
            self.radio.subscribe(&endpoint),
        )
        .await
        {
            Ok(frames) => frames,
            Err(e) => {
                error!(device = %id, "Failed to subscribe: {}", e);
                self.release_link().await;
                self.state
                    .set(ConnectionState::Failed(FailureReason::SubscribeFailed));
                return Err(SessionError::SubscribeFailed {
                    device: id,
                    source: e,
                });
            }
        };
        self.endpoint = Some(endpoint);

        // Step 4: Stream
        self.state.set(ConnectionState::Streaming);
        self.cancel_token = CancellationToken::new();
        self.stream_task = Some(tokio::spawn(Self::process_notifications(
            self.state.clone(),
            frames,
            self.cancel_token.clone(),
        )));

        info!(device = %id, "Connection and setup process completed successfully");
        Ok(())
    }

    async fn resolve_endpoint(&self) -> Result<EndpointHandle, SessionError> {
        let id = &self.state.device.id;
        let wanted = self.endpoint_config;

        let descriptors = match bounded(
            self.operation_timeout,
            "endpoint discovery",
            self.radio.enumerate_endpoints(id),
        )
        .await
        {
            Ok(descriptors) => descriptors,
            Err(e) => {
                warn!(device = %id, "Endpoint discovery failed: {}", e);
                Vec::new()
            }
        };

        let found = descriptors.iter().find(|d| {
            d.service_uuid == wanted.service_uuid
                && d.characteristic_uuid == wanted.characteristic_uuid
        });

        match found {
            Some(descriptor) => {
                if !descriptor.notifiable {
                    warn!(
                        device = %id,
                        "Telemetry characteristic {} does not advertise notify",
                        descriptor.characteristic_uuid
                    );
                }
                info!(device = %id, "Found telemetry endpoint: {}", descriptor.characteristic_uuid);
                Ok(EndpointHandle::new(id.clone(), descriptor))
            }
            None => {
                for d in &descriptors {
                    info!("Available endpoint: {}/{}", d.service_uuid, d.characteristic_uuid);
                }
                Err(SessionError::EndpointNotFound {
                    device: id.clone(),
                    service: wanted.service_uuid,
                    characteristic: wanted.characteristic_uuid,
                })
            }
        }
    }

    /// Decode frames in receipt order until cancelled or the link goes away.
    async fn process_notifications(
        state: Arc<StateCell>,
        mut frames: NotificationStream,
        cancel_token: CancellationToken,
    ) {
        info!("Listening for telemetry notifications...");

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                frame = frames.recv() => frame,
            };

            match frame {
                Some(Ok(bytes)) => {
                    debug!("Received telemetry frame: {} bytes", bytes.len());
                    match protocol::decode(&bytes) {
                        Ok(record) => state.sink.on_telemetry(&record),
                        Err(e) => {
                            warn!("Dropping telemetry frame: {}", e);
                            state.sink.on_error(ErrorKind::DecodeFailed, &e.to_string());
                        }
                    }
                }
                Some(Err(e)) => {
                    error!("Error in notification stream: {}", e);
                    state.link_lost(&e.to_string());
                    break;
                }
                None => {
                    error!("Notification stream closed by the radio");
                    state.link_lost("notification stream closed");
                    break;
                }
            }
        }

        info!("Notification stream ended");
    }

    /// Tear the session down. Never fails: radio errors and stuck calls are
    /// logged and the session still reaches a terminal state.
    pub async fn close(&mut self) {
        let current = self.state.get();
        let failed = matches!(current, ConnectionState::Failed(_));
        if current == ConnectionState::Idle && !self.link_open && self.stream_task.is_none() {
            return;
        }

        let id = self.state.device.id.clone();
        info!(device = %id, "Disconnecting from {}", self.state.device.label());
        if !failed {
            self.state.set(ConnectionState::Disconnecting);
        }

        self.cancel_token.cancel();
        if let Some(mut task) = self.stream_task.take() {
            if tokio::time::timeout(self.teardown_timeout, &mut task)
                .await
                .is_err()
            {
                warn!(device = %id, "Notification task did not stop, aborting it");
                task.abort();
            }
        }

        if let Some(endpoint) = self.endpoint.take() {
            match bounded(
                self.teardown_timeout,
                "unsubscribe",
                self.radio.unsubscribe(&endpoint),
            )
            .await
            {
                Ok(()) => debug!(device = %id, "Unsubscribed from telemetry endpoint"),
                Err(e) => warn!(device = %id, "Unsubscribe failed, ignoring: {}", e),
            }
        }

        self.release_link().await;

        if !failed {
            self.state.set(ConnectionState::Idle);
        }
        info!(device = %id, "Successfully disconnected");
    }

    async fn release_link(&mut self) {
        if !self.link_open {
            return;
        }
        self.link_open = false;

        let id = &self.state.device.id;
        match bounded(self.teardown_timeout, "disconnect", self.radio.disconnect(id)).await {
            Ok(()) => debug!(device = %id, "Link released"),
            Err(e) => warn!(device = %id, "Disconnect failed, ignoring: {}", e),
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
