//! GATT operation dispatch
//! Issues reads, writes, subscriptions, MTU and RSSI requests against a
//! Connected session and turns the platform's completions into events.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::core::bluetooth::connection::ConnectionSession;
use crate::core::bluetooth::constants::{
    DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE, UUID_CLIENT_CHARACTERISTIC_CONFIG,
};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::{BleEvent, RadioEvent, SharedEventSink};
use crate::core::bluetooth::platform::RadioPlatform;
use crate::core::bluetooth::types::{DiscoveredCharacteristic, GattStatus, GattTarget, WriteType};
use crate::core::bluetooth::uuid_normalizer::{self, to_canonical_string};

pub struct GattDispatcher {
    platform: Arc<dyn RadioPlatform>,
    events: SharedEventSink,
    max_mtu: u16,
    default_mtu: u16,
}

impl GattDispatcher {
    pub(crate) fn new(
        platform: Arc<dyn RadioPlatform>,
        events: SharedEventSink,
        max_mtu: u16,
        default_mtu: u16,
    ) -> Self {
        Self {
            platform,
            events,
            max_mtu,
            default_mtu,
        }
    }

    /// Enables notifications on a characteristic.
    ///
    /// Returns once the CCCD write is issued; `NotificationStateChanged`
    /// follows when the peripheral acknowledges it.
    pub async fn subscribe(
        &self,
        session: &ConnectionSession,
        service: &str,
        characteristic: &str,
    ) -> Result<(), BleError> {
        let (target, discovered) = Self::resolve_target(session, service, characteristic)?;
        self.set_notification(session, target, discovered, true).await
    }

    /// Disables notifications on a characteristic. Unknown targets are ignored.
    pub async fn unsubscribe(
        &self,
        session: &ConnectionSession,
        service: &str,
        characteristic: &str,
    ) -> Result<(), BleError> {
        let (target, discovered) = match Self::resolve_target(session, service, characteristic) {
            Ok(resolved) => resolved,
            Err(e @ (BleError::ServiceNotFound(_) | BleError::CharacteristicNotFound(_))) => {
                debug!("Unsubscribe on {} skipped: {}", session.address, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.set_notification(session, target, discovered, false).await
    }

    async fn set_notification(
        &self,
        session: &ConnectionSession,
        target: GattTarget,
        discovered: &DiscoveredCharacteristic,
        enable: bool,
    ) -> Result<(), BleError> {
        let address = session.address.as_str();
        let request_failed = |e: &dyn std::fmt::Display| {
            error!(
                "Notification request for {} on {} failed: {}",
                target.characteristic, address, e
            );
            BleError::NotificationRequestFailed(to_canonical_string(&target.characteristic))
        };

        self.platform
            .set_notification(address, target, enable)
            .await
            .map_err(|e| request_failed(&e))?;

        if !discovered.has_descriptor(&UUID_CLIENT_CHARACTERISTIC_CONFIG) {
            warn!(
                "Characteristic {} on {} has no CCCD, notification state changed locally only",
                target.characteristic, address
            );
            return Ok(());
        }

        let value: &[u8] = if enable {
            &ENABLE_NOTIFICATION_VALUE
        } else {
            &DISABLE_NOTIFICATION_VALUE
        };
        self.platform
            .write_descriptor(address, target, UUID_CLIENT_CHARACTERISTIC_CONFIG, value)
            .await
            .map_err(|e| request_failed(&e))?;

        info!(
            "{} notifications for {} on {}",
            if enable { "Enabling" } else { "Disabling" },
            target.characteristic,
            address
        );
        Ok(())
    }

    /// Issues a read; the value arrives later as `DataReceived`.
    pub async fn read(
        &self,
        session: &ConnectionSession,
        service: &str,
        characteristic: &str,
    ) -> Result<(), BleError> {
        let (target, _) = Self::resolve_target(session, service, characteristic)?;
        self.platform
            .read_characteristic(&session.address, target)
            .await
            .map_err(|e| {
                error!("Read of {} on {} failed: {}", target.characteristic, session.address, e);
                BleError::ReadRequestFailed(to_canonical_string(&target.characteristic))
            })
    }

    pub async fn write(
        &self,
        session: &ConnectionSession,
        service: &str,
        characteristic: &str,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), BleError> {
        let (target, _) = Self::resolve_target(session, service, characteristic)?;
        let write_type = WriteType::from_flag(with_response);
        debug!(
            "Writing {} bytes to {} on {} ({:?})",
            value.len(),
            target.characteristic,
            session.address,
            write_type
        );
        self.platform
            .write_characteristic(&session.address, target, value, write_type)
            .await
            .map_err(|e| {
                error!("Write to {} on {} failed: {}", target.characteristic, session.address, e);
                BleError::WriteRequestFailed(to_canonical_string(&target.characteristic))
            })
    }

    /// Requests a larger MTU, clamped to the platform maximum.
    ///
    /// Platforms without MTU negotiation get an immediate `MtuChanged`
    /// carrying the default MTU.
    pub async fn request_mtu(
        &self,
        session: &ConnectionSession,
        requested: u16,
    ) -> Result<(), BleError> {
        if !self.platform.supports_mtu_negotiation() {
            info!(
                "MTU negotiation unsupported, reporting default MTU {} for {}",
                self.default_mtu, session.address
            );
            self.events.deliver(BleEvent::MtuChanged {
                address: session.address.clone(),
                mtu: self.default_mtu,
            });
            return Ok(());
        }

        let mtu = requested.min(self.max_mtu);
        info!("Requesting MTU {} for {}", mtu, session.address);
        self.platform
            .request_mtu(&session.address, mtu)
            .await
            .map_err(|e| {
                error!("MTU request for {} failed: {}", session.address, e);
                BleError::MtuRequestFailed(mtu)
            })
    }

    pub async fn read_rssi(&self, session: &ConnectionSession) -> Result<(), BleError> {
        self.platform.read_rssi(&session.address).await.map_err(|e| {
            error!("RSSI read for {} failed: {}", session.address, e);
            BleError::RssiRequestFailed(session.address.clone())
        })
    }

    /// Translates an operation completion for a Connected session.
    pub fn on_completion(&self, session: &mut ConnectionSession, event: RadioEvent) {
        let address = session.address.clone();
        match event {
            RadioEvent::CharacteristicRead {
                characteristic,
                status,
                value,
                ..
            } => {
                if status.is_success() {
                    self.data_received(address, &characteristic, value);
                } else {
                    self.report_failure("Characteristic read", &address, &characteristic, status);
                }
            }
            RadioEvent::CharacteristicChanged {
                characteristic,
                value,
                ..
            } => {
                if value.is_empty() {
                    debug!("Empty notification from {} on {} dropped", characteristic, address);
                    return;
                }
                self.data_received(address, &characteristic, value);
            }
            RadioEvent::CharacteristicWritten {
                characteristic,
                status,
                ..
            } => {
                if status.is_success() {
                    debug!("Write to {} on {} acknowledged", characteristic, address);
                } else {
                    self.report_failure("Characteristic write", &address, &characteristic, status);
                }
            }
            RadioEvent::DescriptorWritten {
                characteristic,
                descriptor,
                status,
                ..
            } => {
                if !status.is_success() {
                    self.report_failure("Descriptor write", &address, &characteristic, status);
                } else if descriptor == UUID_CLIENT_CHARACTERISTIC_CONFIG {
                    self.events.deliver(BleEvent::NotificationStateChanged {
                        address,
                        characteristic_uuid: to_canonical_string(&characteristic),
                    });
                }
            }
            RadioEvent::MtuChanged { mtu, status, .. } => {
                if !status.is_success() {
                    error!("MTU change on {} failed: {:?}", address, status);
                    self.events
                        .deliver(BleEvent::error(format!("MTU change failed for device: {address}")));
                    return;
                }
                if let Some(link) = session.link.as_mut() {
                    link.mtu = mtu;
                }
                info!("MTU for {} is now {}", address, mtu);
                self.events.deliver(BleEvent::MtuChanged { address, mtu });
            }
            RadioEvent::RssiRead { rssi, status, .. } => {
                if status.is_success() {
                    self.events.deliver(BleEvent::RssiRead {
                        address,
                        signal_strength: rssi,
                    });
                } else {
                    error!("RSSI read on {} failed: {:?}", address, status);
                    self.events
                        .deliver(BleEvent::error(format!("RSSI read failed for device: {address}")));
                }
            }
            other => debug!("Dispatcher ignoring {:?}", other),
        }
    }

    fn data_received(&self, address: String, characteristic: &uuid::Uuid, payload: Vec<u8>) {
        self.events.deliver(BleEvent::DataReceived {
            address,
            characteristic_uuid: to_canonical_string(characteristic),
            payload,
        });
    }

    fn report_failure(
        &self,
        operation: &str,
        address: &str,
        characteristic: &uuid::Uuid,
        status: GattStatus,
    ) {
        let characteristic = to_canonical_string(characteristic);
        error!("{} of {} on {} failed: {:?}", operation, characteristic, address, status);
        let code = match status {
            GattStatus::Failure(code) => code,
            GattStatus::Success => 0,
        };
        self.events.deliver(BleEvent::error(format!(
            "{operation} failed for {characteristic} on {address} (status {code})"
        )));
    }

    fn resolve_target<'a>(
        session: &'a ConnectionSession,
        service: &str,
        characteristic: &str,
    ) -> Result<(GattTarget, &'a DiscoveredCharacteristic), BleError> {
        let service_uuid = uuid_normalizer::parse(service)?;
        let characteristic_uuid = uuid_normalizer::parse(characteristic)?;

        if session.catalog.service(&service_uuid).is_none() {
            return Err(BleError::ServiceNotFound(to_canonical_string(&service_uuid)));
        }
        let discovered = session
            .catalog
            .characteristic(&service_uuid, &characteristic_uuid)
            .ok_or_else(|| {
                BleError::CharacteristicNotFound(to_canonical_string(&characteristic_uuid))
            })?;

        Ok((
            GattTarget {
                service: service_uuid,
                characteristic: characteristic_uuid,
            },
            discovered,
        ))
    }
}
