//! Constants used throughout the central core
//! This module contains the fixed protocol values and the default timings
//! and limits that `CentralConfig` starts from.

use uuid::Uuid;

/// The Bluetooth base UUID; 16-bit UUIDs are substituted into its first field.
pub const BLUETOOTH_BASE_UUID: &str = "00000000-0000-1000-8000-00805F9B34FB";

/// Length of a short-form (16-bit) UUID string
pub const SHORT_UUID_LENGTH: usize = 4;

/// Length of a full hyphenated 128-bit UUID string
pub const FULL_UUID_LENGTH: usize = 36;

/// Client Characteristic Configuration Descriptor
pub const UUID_CLIENT_CHARACTERISTIC_CONFIG: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value disabling notifications and indications
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Maximum number of connection attempts before a connect is abandoned
pub const MAX_CONNECT_RETRIES: u32 = 3;

/// Delay between connection attempts in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 2000;

/// Delay between the Connected transition and service discovery in milliseconds
pub const SERVICE_DISCOVERY_DELAY_MS: u64 = 600;

/// Scan duration in milliseconds before the scan stops on its own
pub const SCAN_TIMEOUT_MS: u64 = 30_000;

/// Bound on the wait for a connection-priority result in milliseconds
pub const PRIORITY_REQUEST_TIMEOUT_MS: u64 = 1000;

/// ATT MTU every link starts with
pub const DEFAULT_MTU: u16 = 23;

/// Largest MTU the platform accepts
pub const MAX_MTU: u16 = 512;

/// Status code reported for a generic GATT failure
pub const GATT_FAILURE: i32 = 0x101;
