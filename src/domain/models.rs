use std::fmt;
use uuid::Uuid;

/// A peripheral reported by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Advertised local name, `None` when the advertisement carried none
    pub name: Option<String>,
    /// 48-bit Bluetooth address
    pub address: u64,
}

impl DiscoveredDevice {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.display_name(), format_address(self.address))
    }
}

/// Format a 48-bit address as `AA:BB:CC:DD:EE:FF`
pub fn format_address(address: u64) -> String {
    let bytes = address.to_be_bytes();
    bytes[2..]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// Link state as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Non-success status code of a GATT operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattStatus(pub u32);

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GATT status {}", self.0)
    }
}

/// Monotonic identifier of one scan attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Discrete results delivered by a BLE backend (or the scan timer)
#[derive(Debug, Clone, PartialEq)]
pub enum BleEvent {
    ScanResult(DiscoveredDevice),
    ScanTimedOut,
    ConnectionStateChanged(LinkState),
    ServicesDiscovered(Result<Vec<GattService>, GattStatus>),
    DescriptorWritten(Result<(), GattStatus>),
    CharacteristicChanged { characteristic: Uuid, value: Vec<u8> },
}

/// An event on the ordered channel, stamped with the session that caused it
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: BleEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    DiscoveringServices,
    Subscribed,
    Failed,
    Disconnected,
}

impl SessionState {
    /// No further transitions happen once a session reaches one of these
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }

    /// Scan, connect and discovery phases
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Scanning | Self::Connecting | Self::Connected | Self::DiscoveringServices
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Idle => "IDLE",
            Self::Scanning => "SCANNING...",
            Self::Connecting => "CONNECTING...",
            Self::Connected => "CONNECTED",
            Self::DiscoveringServices => "DISCOVERING SERVICES...",
            Self::Subscribed => "STREAMING",
            Self::Failed => "FAILED",
            Self::Disconnected => "DISCONNECTED",
        };
        f.write_str(text)
    }
}

/// Runtime grant for scanning and connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Requests from the UI to the BLE worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    StartScan,
    StopSession,
    Shutdown,
}

/// Notifications from the BLE worker to the UI
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    SessionState(SessionState),
    LogMessage(StatusMessage),
    SamplesRecorded(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
