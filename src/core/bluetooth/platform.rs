//! Radio platform seam
//! The primitives the core needs from the platform's BLE stack. Issuing
//! methods return as soon as the request is accepted or refused; completions
//! are reported later as `RadioEvent`s on the channel the platform was
//! constructed with.

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::bluetooth::error::PlatformError;
use crate::core::bluetooth::types::{AdapterState, ConnectionPriority, GattTarget, WriteType};

#[async_trait]
pub trait RadioPlatform: Send + Sync {
    /// Current adapter power state
    async fn adapter_state(&self) -> AdapterState;

    /// Whether the OS granted the scan/connect capabilities
    fn has_permissions(&self) -> bool {
        true
    }

    /// Starts advertisement scanning; an empty filter list reports everything.
    async fn start_scan(&self, service_filters: &[Uuid]) -> Result<(), PlatformError>;

    async fn stop_scan(&self) -> Result<(), PlatformError>;

    /// Starts link establishment. Reports `ConnectionStateChanged` or
    /// `ConnectionFailed` later.
    async fn connect(&self, address: &str) -> Result<(), PlatformError>;

    /// Requests link termination. Reports `ConnectionStateChanged` later.
    async fn disconnect(&self, address: &str) -> Result<(), PlatformError>;

    /// Releases every platform resource tied to the address's session.
    async fn close(&self, address: &str);

    /// Drops cached device handles for every address not in `keep`.
    fn forget_devices(&self, keep: &[String]);

    /// Reports `ServicesDiscovered` later.
    async fn discover_services(&self, address: &str) -> Result<(), PlatformError>;

    /// Toggles local delivery of notifications for a characteristic.
    async fn set_notification(
        &self,
        address: &str,
        target: GattTarget,
        enable: bool,
    ) -> Result<(), PlatformError>;

    /// Reports `DescriptorWritten` later.
    async fn write_descriptor(
        &self,
        address: &str,
        target: GattTarget,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError>;

    /// Reports `CharacteristicRead` later.
    async fn read_characteristic(
        &self,
        address: &str,
        target: GattTarget,
    ) -> Result<(), PlatformError>;

    /// Reports `CharacteristicWritten` later.
    async fn write_characteristic(
        &self,
        address: &str,
        target: GattTarget,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), PlatformError>;

    fn supports_mtu_negotiation(&self) -> bool;

    /// Reports `MtuChanged` later.
    async fn request_mtu(&self, address: &str, mtu: u16) -> Result<(), PlatformError>;

    /// Reports `RssiRead` later.
    async fn read_rssi(&self, address: &str) -> Result<(), PlatformError>;

    /// Applies a connection priority; the result is known on return.
    async fn request_connection_priority(
        &self,
        address: &str,
        priority: ConnectionPriority,
    ) -> Result<(), PlatformError>;
}
