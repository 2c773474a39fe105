//! BLE Scanner Module
//!
//! Time-bounded discovery of nearby wearables. Discovery events are
//! deduplicated through the [`DeviceRegistry`] and forwarded in first-seen
//! order.

use crate::domain::models::{ErrorKind, ScanState};
use crate::domain::registry::DeviceRegistry;
use crate::error::SessionError;
use crate::infrastructure::bluetooth::radio::{
    AdapterState, DiscoveryEvent, DiscoveryStream, Radio,
};
use crate::presentation::sink::EventSink;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// State shared between the session handle and its scan task.
struct ScanShared {
    state: Mutex<ScanState>,
    registry: Arc<DeviceRegistry>,
    sink: Arc<dyn EventSink>,
}

impl ScanShared {
    fn lock(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: DiscoveryEvent) {
        let identity = event.identity;
        if self.registry.insert(identity.clone()) {
            info!(
                "Found device - ID: {}, Name: {:?}",
                identity.id, event.raw_name
            );
            self.sink.on_device_discovered(&identity);
        } else {
            trace!("Ignoring repeated advertisement from {}", identity.id);
        }
    }

    /// Move `Scanning` to `outcome`. Only the first caller wins.
    fn finish(&self, outcome: ScanState) -> bool {
        let mut state = self.lock();
        if *state != ScanState::Scanning {
            return false;
        }
        *state = outcome;
        let devices_found = self.registry.len();
        info!("Scan finished: {:?}, {} device(s) found", *state, devices_found);
        self.sink.on_scan_finished(&state, devices_found);
        true
    }
}

/// One scan window at a time over the shared radio.
pub struct ScanSession {
    radio: Arc<dyn Radio>,
    shared: Arc<ScanShared>,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
    teardown_timeout: Duration,
}

impl ScanSession {
    pub fn new(
        radio: Arc<dyn Radio>,
        registry: Arc<DeviceRegistry>,
        sink: Arc<dyn EventSink>,
        teardown_timeout: Duration,
    ) -> Self {
        Self {
            radio,
            shared: Arc::new(ScanShared {
                state: Mutex::new(ScanState::Idle),
                registry,
                sink,
            }),
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
            teardown_timeout,
        }
    }

    pub fn state(&self) -> ScanState {
        self.shared.lock().clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.state() == ScanState::Scanning
    }

    /// Start a scan window of `timeout`, measured from this call.
    pub async fn start(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        if self.is_scanning() {
            return Err(SessionError::AlreadyScanning);
        }

        let adapter = self.radio.adapter_state().await;
        if adapter != AdapterState::On {
            warn!("Bluetooth adapter is {:?}, not scanning", adapter);
            return Err(SessionError::RadioUnavailable);
        }

        if let Some(previous) = self.scan_task_handle.take() {
            previous.abort();
        }
        self.shared.registry.reset();
        *self.shared.lock() = ScanState::Scanning;

        info!("Starting bluetooth scan ({:?} window)", timeout);
        let events = match self.radio.start_scan().await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to start scan: {}", e);
                self.shared.finish(ScanState::Errored(e.to_string()));
                return Err(SessionError::ScanFailed(e));
            }
        };

        self.cancel_token = CancellationToken::new();
        let handle = tokio::spawn(Self::internal_scan_task(
            self.radio.clone(),
            self.shared.clone(),
            events,
            self.cancel_token.clone(),
            deadline,
            self.teardown_timeout,
        ));
        self.scan_task_handle = Some(handle);

        info!("Device scan task started.");
        Ok(())
    }

    async fn internal_scan_task(
        radio: Arc<dyn Radio>,
        shared: Arc<ScanShared>,
        mut events: DiscoveryStream,
        cancel_token: CancellationToken,
        deadline: Instant,
        teardown_timeout: Duration,
    ) {
        let window = tokio::time::sleep_until(deadline);
        tokio::pin!(window);
        let mut events_open = true;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break ScanState::Stopped,
                _ = &mut window => break ScanState::TimedOut,
                event = events.recv(), if events_open => match event {
                    Some(Ok(event)) => shared.record(event),
                    Some(Err(e)) => {
                        error!("Error in discovery stream: {}", e);
                        break ScanState::Errored(e.to_string());
                    }
                    None => {
                        debug!("Discovery stream ended before the scan window closed");
                        events_open = false;
                    }
                },
            }
        };

        match tokio::time::timeout(teardown_timeout, radio.stop_scan()).await {
            Ok(Ok(())) => debug!("Radio scan halted"),
            Ok(Err(e)) => warn!("Failed to halt radio scan: {}", e),
            Err(_) => warn!("Radio did not confirm scan stop within {:?}", teardown_timeout),
        }

        let message = match &outcome {
            ScanState::Errored(message) => Some(message.clone()),
            _ => None,
        };
        if shared.finish(outcome) {
            if let Some(message) = message {
                shared.sink.on_error(ErrorKind::ScanFailed, &message);
            }
        }
    }

    /// Cancel the running scan. Returns the terminal state reached.
    ///
    /// A radio that never confirms the stop does not block this past twice
    /// the teardown timeout; the state is forced to `Stopped`.
    pub async fn stop(&mut self) -> ScanState {
        if !self.is_scanning() {
            return self.state();
        }

        info!("Stopping Bluetooth scan.");
        self.cancel_token.cancel();

        if let Some(mut handle) = self.scan_task_handle.take() {
            match tokio::time::timeout(self.teardown_timeout * 2, &mut handle).await {
                Ok(Ok(())) => debug!("Scan task finished after cancellation."),
                Ok(Err(e)) => error!("Scan task finished with a join error: {:?}", e),
                Err(_) => {
                    warn!("Scan task is stuck, forcing scan state to Stopped");
                    handle.abort();
                }
            }
        }

        self.shared.finish(ScanState::Stopped);
        self.state()
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AppEvent;
    use crate::infrastructure::bluetooth::mock::{MockRadio, RadioCall};
    use tokio::sync::mpsc;

    const TEARDOWN: Duration = Duration::from_secs(2);

    fn session(
        radio: &Arc<MockRadio>,
    ) -> (
        ScanSession,
        Arc<DeviceRegistry>,
        mpsc::UnboundedReceiver<AppEvent>,
    ) {
        let registry = Arc::new(DeviceRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let scan = ScanSession::new(radio.clone(), registry.clone(), Arc::new(tx), TEARDOWN);
        (scan, registry, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_advertisements_are_reported_once() {
        let radio = Arc::new(MockRadio::new());
        let (mut scan, registry, mut rx) = session(&radio);

        scan.start(Duration::from_secs(10)).await.unwrap();
        for _ in 0..5 {
            assert!(radio.advertise("band-1", Some("Band")));
        }
        assert!(radio.advertise("band-2", None));
        assert!(radio.advertise("band-1", Some("Band")));
        settle().await;

        assert_eq!(registry.len(), 2);
        let discovered: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::DeviceDiscovered(d) => Some(d.id.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(discovered, vec!["band-1", "band-2"]);

        assert_eq!(scan.stop().await, ScanState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_scan_times_out_after_window() {
        let radio = Arc::new(MockRadio::new());
        let (mut scan, _registry, mut rx) = session(&radio);

        let started = Instant::now();
        scan.start(Duration::from_secs(10)).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            AppEvent::ScanFinished {
                state: ScanState::TimedOut,
                devices_found: 0
            }
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
        assert_eq!(scan.state(), ScanState::TimedOut);
        assert_eq!(radio.calls(), vec![RadioCall::StartScan, RadioCall::StopScan]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_scanning_is_rejected() {
        let radio = Arc::new(MockRadio::new());
        let (mut scan, _registry, _rx) = session(&radio);

        scan.start(Duration::from_secs(10)).await.unwrap();
        let err = scan.start(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyScanning));
        assert!(scan.is_scanning());
        assert_eq!(radio.calls(), vec![RadioCall::StartScan]);
    }

    #[tokio::test(start_paused = true)]
    async fn radio_off_refuses_to_scan() {
        let radio = Arc::new(MockRadio::new());
        radio.set_adapter(AdapterState::Off);
        let (mut scan, _registry, _rx) = session(&radio);

        let err = scan.start(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, SessionError::RadioUnavailable));
        assert_eq!(scan.state(), ScanState::Idle);
        assert!(radio.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_scan_clears_registry() {
        let radio = Arc::new(MockRadio::new());
        let (mut scan, registry, _rx) = session(&radio);

        scan.start(Duration::from_secs(10)).await.unwrap();
        radio.advertise("band-1", Some("Band"));
        settle().await;
        scan.stop().await;
        assert_eq!(registry.len(), 1);

        scan.start(Duration::from_secs(10)).await.unwrap();
        assert!(registry.is_empty());
        scan.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_error_ends_scan() {
        let radio = Arc::new(MockRadio::new());
        let (mut scan, _registry, mut rx) = session(&radio);

        scan.start(Duration::from_secs(10)).await.unwrap();
        assert!(radio.scan_error("adapter reset"));

        let finished = rx.recv().await.unwrap();
        assert!(matches!(
            finished,
            AppEvent::ScanFinished {
                state: ScanState::Errored(_),
                ..
            }
        ));
        let error = rx.recv().await.unwrap();
        assert!(matches!(
            error,
            AppEvent::Error {
                kind: ErrorKind::ScanFailed,
                ..
            }
        ));
        assert_eq!(radio.calls().last(), Some(&RadioCall::StopScan));
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_is_errored() {
        let radio = Arc::new(MockRadio::new());
        radio.fail_start_scan();
        let (mut scan, _registry, _rx) = session(&radio);

        let err = scan.start(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, SessionError::ScanFailed(_)));
        assert!(matches!(scan.state(), ScanState::Errored(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_bounded_when_radio_hangs() {
        let radio = Arc::new(MockRadio::new());
        radio.hang_stop_scan();
        let (mut scan, _registry, mut rx) = session(&radio);

        scan.start(Duration::from_secs(10)).await.unwrap();
        let started = Instant::now();
        assert_eq!(scan.stop().await, ScanState::Stopped);
        assert!(started.elapsed() <= TEARDOWN * 2);

        let finished: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, AppEvent::ScanFinished { .. }))
            .collect();
        assert_eq!(finished.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_when_idle_is_a_no_op() {
        let radio = Arc::new(MockRadio::new());
        let (mut scan, _registry, _rx) = session(&radio);

        assert_eq!(scan.stop().await, ScanState::Idle);
        assert!(radio.calls().is_empty());
    }
}
