use std::fmt;
use std::time::Duration;

/// Platform-assigned identifier of a peripheral, stable per physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A discovered peripheral. Equality is by `id` only.
#[derive(Debug, Clone)]
pub struct PeripheralIdentity {
    pub id: PeripheralId,
    pub display_name: Option<String>,
}

impl PeripheralIdentity {
    pub fn new(id: impl Into<PeripheralId>, display_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.filter(|name| !name.trim().is_empty()),
        }
    }

    /// Name for display, falling back to the id.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.id.as_str())
    }
}

impl PartialEq for PeripheralIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeripheralIdentity {}

impl std::hash::Hash for PeripheralIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One decoded telemetry snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryRecord {
    /// Device-formatted timestamp, passed through uninterpreted
    pub time: Option<String>,
    pub heart_rate: i32,
    pub steps: i32,
    pub status: Option<String>,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time={} heart_rate={} steps={} status={}",
            self.time.as_deref().unwrap_or("-"),
            self.heart_rate,
            self.steps,
            self.status.as_deref().unwrap_or("-"),
        )
    }
}

/// Why a connection session ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ConnectFailed,
    EndpointNotFound,
    SubscribeFailed,
    TransportDropped,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::ConnectFailed => "connect-failed",
            Self::EndpointNotFound => "endpoint-not-found",
            Self::SubscribeFailed => "subscribe-failed",
            Self::TransportDropped => "transport-dropped",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    EndpointDiscovery,
    Subscribing,
    Streaming,
    Disconnecting,
    Failed(FailureReason),
}

impl ConnectionState {
    /// `Idle` and `Failed` are the states a session rests in.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Stopped,
    TimedOut,
    Errored(String),
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::TimedOut | Self::Errored(_))
    }
}

/// Categories passed to the presentation layer alongside an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RadioUnavailable,
    AlreadyScanning,
    AlreadyConnected,
    NoDevicesFound,
    ScanFailed,
    UnknownDevice,
    NotConnected,
    ConnectFailed,
    EndpointNotFound,
    SubscribeFailed,
    DecodeFailed,
    TransportDropped,
}

impl ErrorKind {
    pub fn severity(&self) -> MessageSeverity {
        match self {
            Self::AlreadyScanning
            | Self::AlreadyConnected
            | Self::NoDevicesFound
            | Self::NotConnected
            | Self::DecodeFailed => MessageSeverity::Warning,
            _ => MessageSeverity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Warning,
    Error,
}

/// Everything the session layer tells the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    DeviceDiscovered(PeripheralIdentity),
    ScanFinished {
        state: ScanState,
        devices_found: usize,
    },
    ConnectionState {
        device: PeripheralIdentity,
        state: ConnectionState,
    },
    Telemetry(TelemetryRecord),
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// Commands issued by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluetoothCommand {
    StartScan,
    StopScan,
    Connect(PeripheralId),
    Disconnect,
    Shutdown,
}

/// Timing and endpoint parameters shared by the sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub scan_timeout: Duration,
    pub endpoint: EndpointConfig,
    /// Bound for connect, endpoint discovery and subscribe
    pub operation_timeout: Duration,
    /// Bound for scan-stop, unsubscribe and disconnect
    pub teardown_timeout: Duration,
}

/// Service/characteristic pair a connection session looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    pub service_uuid: uuid::Uuid,
    pub characteristic_uuid: uuid::Uuid,
}
