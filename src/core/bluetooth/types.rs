//! Defines shared data structures for the Bluetooth module.

use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::error::BleError;

/// Raw advertisement as reported by the platform scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Stable hardware address of the advertiser
    pub address: String,
    /// Advertised local name, falling back to the platform's cached device name
    pub name: Option<String>,
    /// Signal strength in platform-native units (dBm)
    pub rssi: i16,
    /// Opaque advertising payload, empty when the platform does not expose it
    pub payload: Vec<u8>,
    /// Service UUIDs listed in the advertisement
    pub service_uuids: Vec<Uuid>,
}

/// Represents a device seen during the current scan session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// The address of the device
    pub address: String,
    /// The name of the device, if available
    pub display_name: Option<String>,
    /// The signal strength (RSSI) of the last advertisement
    pub signal_strength: i16,
    /// The payload of the last advertisement
    pub advertising_payload: Vec<u8>,
}

impl ScanResult {
    /// Creates a new ScanResult from the first advertisement of an address
    pub fn from_advertisement(advertisement: &Advertisement) -> Self {
        Self {
            address: advertisement.address.clone(),
            display_name: advertisement.name.clone(),
            signal_strength: advertisement.rssi,
            advertising_payload: advertisement.payload.clone(),
        }
    }

    /// Refreshes the cached strength and payload from a repeated advertisement
    pub fn refresh(&mut self, advertisement: &Advertisement) {
        self.signal_strength = advertisement.rssi;
        self.advertising_payload = advertisement.payload.clone();
    }
}

/// Lifecycle state of a connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Link-level state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Adapter power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdapterState {
    PoweredOff,
    PoweredOn,
    TurningOff,
    TurningOn,
    Unknown,
}

/// Connection interval preference for a live link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionPriority {
    Balanced,
    High,
    LowPower,
}

impl ConnectionPriority {
    /// Resolves a raw priority value.
    ///
    /// The native scheme (0 balanced, 1 high, 2 low power) is matched first;
    /// only values it does not cover fall through to the legacy 1..=3 scheme.
    pub fn from_raw(raw: i32) -> Result<Self, BleError> {
        match raw {
            0 => Ok(Self::Balanced),
            1 => Ok(Self::High),
            2 => Ok(Self::LowPower),
            _ => Self::from_legacy(raw),
        }
    }

    /// Resolves a value in the legacy scheme (1 low power, 2 balanced, 3 high).
    pub fn from_legacy(raw: i32) -> Result<Self, BleError> {
        match raw {
            1 => Ok(Self::LowPower),
            2 => Ok(Self::Balanced),
            3 => Ok(Self::High),
            _ => Err(BleError::InvalidArgument(format!(
                "connection priority {raw}"
            ))),
        }
    }
}

/// Write semantics for a characteristic write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

impl WriteType {
    pub fn from_flag(with_response: bool) -> Self {
        if with_response {
            Self::WithResponse
        } else {
            Self::WithoutResponse
        }
    }
}

/// A characteristic addressed by its service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Completion status of an asynchronous GATT operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure(i32),
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A characteristic found during service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    /// Descriptors the platform exposes for this characteristic
    pub descriptors: Vec<Uuid>,
}

impl DiscoveredCharacteristic {
    pub fn new(uuid: Uuid, descriptors: Vec<Uuid>) -> Self {
        Self { uuid, descriptors }
    }

    pub fn has_descriptor(&self, uuid: &Uuid) -> bool {
        self.descriptors.contains(uuid)
    }
}

/// A service and its characteristics, in the order the platform reported them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl DiscoveredService {
    pub fn new(uuid: Uuid, characteristics: Vec<DiscoveredCharacteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }
}
