//! BLE central bridge library
//! Scanning, connection supervision and GATT operations for a host-runtime bridge.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;

pub use crate::config::AppConfig;
pub use crate::core::{BleError, BleEvent, BluetoothManager, DeviceRegistry, RadioPlatform};
pub use crate::state::AppState;
