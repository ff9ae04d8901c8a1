//! Event types crossing the core's boundaries
//! `BleEvent` flows out to the event sink, `RadioEvent` flows in from the
//! platform's callback context.

use std::sync::Arc;

use log::warn;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::types::{Advertisement, DiscoveredService, GattStatus, LinkState};

/// Structured outcome delivered to the event sink.
///
/// Payloads are raw bytes; any text encoding is the sink's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BleEvent {
    Initialized,
    Error {
        message: String,
    },
    DeviceDiscovered {
        address: String,
        name: Option<String>,
        signal_strength: i16,
        advertising_payload: Vec<u8>,
    },
    DeviceConnected {
        address: String,
    },
    DeviceDisconnected {
        address: String,
    },
    ServiceDiscovered {
        address: String,
        service_uuid: String,
    },
    CharacteristicDiscovered {
        address: String,
        service_uuid: String,
        characteristic_uuid: String,
    },
    DataReceived {
        address: String,
        characteristic_uuid: String,
        payload: Vec<u8>,
    },
    MtuChanged {
        address: String,
        mtu: u16,
    },
    NotificationStateChanged {
        address: String,
        characteristic_uuid: String,
    },
    RssiRead {
        address: String,
        signal_strength: i16,
    },
}

impl BleEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<&BleError> for BleEvent {
    fn from(err: &BleError) -> Self {
        Self::error(err.to_string())
    }
}

/// Consumer of the core's outbound events.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: BleEvent);
}

impl EventSink for mpsc::UnboundedSender<BleEvent> {
    fn deliver(&self, event: BleEvent) {
        if let Err(e) = self.send(event) {
            warn!("Event sink closed, dropping {:?}", e.0);
        }
    }
}

pub type SharedEventSink = Arc<dyn EventSink>;

/// Asynchronous result produced by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Advertisement(Advertisement),
    ScanFailed {
        code: i32,
    },
    ConnectionStateChanged {
        address: String,
        state: LinkState,
        name: Option<String>,
    },
    /// Link establishment failed after the connect was issued.
    ConnectionFailed {
        address: String,
        reason: String,
    },
    ServicesDiscovered {
        address: String,
        status: GattStatus,
        services: Vec<DiscoveredService>,
    },
    CharacteristicRead {
        address: String,
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    },
    CharacteristicChanged {
        address: String,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    CharacteristicWritten {
        address: String,
        characteristic: Uuid,
        status: GattStatus,
    },
    DescriptorWritten {
        address: String,
        characteristic: Uuid,
        descriptor: Uuid,
        status: GattStatus,
    },
    MtuChanged {
        address: String,
        mtu: u16,
        status: GattStatus,
    },
    RssiRead {
        address: String,
        rssi: i16,
        status: GattStatus,
    },
}

impl RadioEvent {
    /// Address the event belongs to; scan-level events have none.
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Advertisement(_) | Self::ScanFailed { .. } => None,
            Self::ConnectionStateChanged { address, .. }
            | Self::ConnectionFailed { address, .. }
            | Self::ServicesDiscovered { address, .. }
            | Self::CharacteristicRead { address, .. }
            | Self::CharacteristicChanged { address, .. }
            | Self::CharacteristicWritten { address, .. }
            | Self::DescriptorWritten { address, .. }
            | Self::MtuChanged { address, .. }
            | Self::RssiRead { address, .. } => Some(address),
        }
    }
}

pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// Creates the channel a platform reports its callbacks on.
pub fn radio_channel() -> (RadioEventSender, RadioEventReceiver) {
    mpsc::unbounded_channel()
}
