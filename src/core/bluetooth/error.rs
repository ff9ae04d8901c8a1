//! Error types for the central core.

use thiserror::Error;

/// Errors reported by the central core to the caller of a command.
///
/// Errors raised while issuing a command never change session state.
/// Asynchronous failures are surfaced as `BleEvent::Error` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("BLE not initialized")]
    NotInitialized,

    #[error("Bluetooth adapter not available or not enabled")]
    AdapterUnavailable,

    #[error("Bluetooth permissions not granted")]
    PermissionDenied,

    /// A scan or connect for the same target is already active.
    #[error("{0} already in progress")]
    AlreadyInProgress(String),

    #[error("Device not connected: {0}")]
    NotConnected(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// Bad UUID, priority or MTU value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to read characteristic: {0}")]
    ReadRequestFailed(String),

    #[error("Failed to write characteristic: {0}")]
    WriteRequestFailed(String),

    #[error("Failed to read RSSI: {0}")]
    RssiRequestFailed(String),

    #[error("Failed to request MTU: {0}")]
    MtuRequestFailed(u16),

    #[error("Failed to change notification state for: {0}")]
    NotificationRequestFailed(String),

    /// Any other command the platform refused before an asynchronous result could occur.
    #[error("Request rejected by platform: {0}")]
    RequestRejected(String),

    #[error("Failed to connect after {attempts} attempts: {address}")]
    ConnectionRetriesExhausted { address: String, attempts: u32 },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("BLE command context has shut down")]
    ManagerShutdown,
}

impl BleError {
    /// True for errors that only warrant a warning, never an error event.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::AlreadyInProgress(_))
    }
}

/// Failures reported by a `RadioPlatform` when a command is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("adapter unavailable")]
    AdapterUnavailable,

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("operation not supported by this platform")]
    Unsupported,

    #[error("request rejected: {0}")]
    Rejected(String),
}
