//! Connection supervision for remote peripherals
//! This module owns one session per address and drives it through
//! connect, retry, service discovery and disconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::error::{BleError, PlatformError};
use crate::core::bluetooth::events::{BleEvent, SharedEventSink};
use crate::core::bluetooth::platform::RadioPlatform;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::timer::{TimerEvent, TimerQueue};
use crate::core::bluetooth::types::{
    ConnectionPriority, ConnectionState, DiscoveredCharacteristic, DiscoveredService, GattStatus,
    LinkState,
};
use crate::core::bluetooth::uuid_normalizer::to_canonical_string;

/// Services and characteristics found by the last successful discovery
#[derive(Debug, Default, Clone)]
pub struct ServiceCatalog {
    services: Vec<DiscoveredService>,
}

impl ServiceCatalog {
    /// Replaces the whole catalog with a fresh discovery result.
    pub fn rebuild(&mut self, services: Vec<DiscoveredService>) {
        self.services = services;
    }

    pub fn clear(&mut self) {
        self.services.clear();
    }

    pub fn service(&self, uuid: &Uuid) -> Option<&DiscoveredService> {
        self.services.iter().find(|s| s.uuid == *uuid)
    }

    pub fn characteristic(
        &self,
        service: &Uuid,
        characteristic: &Uuid,
    ) -> Option<&DiscoveredCharacteristic> {
        self.service(service)?
            .characteristics
            .iter()
            .find(|c| c.uuid == *characteristic)
    }

    pub fn services(&self) -> &[DiscoveredService] {
        &self.services
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Live GATT link of a Connected session
#[derive(Debug, Clone, Copy)]
pub struct GattLink {
    pub mtu: u16,
    pub connected_at: DateTime<Utc>,
}

/// Per-address connection state owned by the supervisor
#[derive(Debug)]
pub struct ConnectionSession {
    pub address: String,
    pub state: ConnectionState,
    pub retry_count: u32,
    /// Distinguishes this session from earlier ones for the same address
    generation: u64,
    /// Present only while Connected
    pub link: Option<GattLink>,
    pub catalog: ServiceCatalog,
    /// Set while a discovery issued for this session has not reported back
    discovery_pending: bool,
    /// Cancels the retry and settle timers of this session
    timers: CancellationToken,
}

impl ConnectionSession {
    fn new(address: &str, generation: u64) -> Self {
        Self {
            address: address.to_string(),
            state: ConnectionState::Connecting,
            retry_count: 0,
            generation,
            link: None,
            catalog: ServiceCatalog::default(),
            discovery_pending: false,
            timers: CancellationToken::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    #[cfg(test)]
    pub(crate) fn connected_with(address: &str, services: Vec<DiscoveredService>) -> Self {
        let mut session = Self::new(address, 1);
        session.state = ConnectionState::Connected;
        session.link = Some(GattLink {
            mtu: 23,
            connected_at: Utc::now(),
        });
        session.catalog.rebuild(services);
        session
    }
}

/// Timings and limits of the supervisor
#[derive(Debug, Clone, Copy)]
pub(crate) struct SupervisorSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub settle_delay: Duration,
    pub default_mtu: u16,
}

pub struct ConnectionSupervisor {
    platform: Arc<dyn RadioPlatform>,
    events: SharedEventSink,
    registry: Arc<DeviceRegistry>,
    timers: TimerQueue,
    settings: SupervisorSettings,
    sessions: HashMap<String, ConnectionSession>,
    next_generation: u64,
}

impl ConnectionSupervisor {
    pub(crate) fn new(
        platform: Arc<dyn RadioPlatform>,
        events: SharedEventSink,
        registry: Arc<DeviceRegistry>,
        timers: TimerQueue,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            platform,
            events,
            registry,
            timers,
            settings,
            sessions: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Opens a session for `address` and issues the first connection attempt.
    ///
    /// A session that is already live is left untouched and reported as
    /// `AlreadyInProgress`.
    pub async fn connect(&mut self, address: &str) -> Result<(), BleError> {
        if let Some(session) = self.sessions.get(address) {
            warn!(
                "Connect ignored for {}, session is {:?}",
                address, session.state
            );
            return Err(BleError::AlreadyInProgress(format!(
                "Connection to {address}"
            )));
        }

        self.next_generation += 1;
        self.sessions.insert(
            address.to_string(),
            ConnectionSession::new(address, self.next_generation),
        );
        info!("Initiating connection to {}...", address);
        self.attempt(address, true).await
    }

    async fn attempt(&mut self, address: &str, first: bool) -> Result<(), BleError> {
        match self.platform.connect(address).await {
            Ok(()) => Ok(()),
            Err(PlatformError::UnknownDevice(_)) if first => {
                error!("Device not found: {}", address);
                self.remove_session(address);
                Err(BleError::RequestRejected(format!(
                    "Device not found: {address}"
                )))
            }
            Err(e) => {
                self.handle_failed_attempt(address, &e.to_string()).await;
                Ok(())
            }
        }
    }

    async fn handle_failed_attempt(&mut self, address: &str, reason: &str) {
        let max_retries = self.settings.max_retries;
        let Some(session) = self.sessions.get_mut(address) else {
            return;
        };
        if session.state != ConnectionState::Connecting {
            return;
        }

        session.retry_count += 1;
        warn!(
            "Connection attempt {} failed for {}: {}",
            session.retry_count, address, reason
        );

        if session.retry_count >= max_retries {
            self.remove_session(address);
            self.platform.close(address).await;
            let err = BleError::ConnectionRetriesExhausted {
                address: address.to_string(),
                attempts: max_retries,
            };
            error!("{}", err);
            self.events.deliver(BleEvent::from(&err));
            return;
        }

        info!(
            "Retrying connection in {} ms...",
            self.settings.retry_delay.as_millis()
        );
        self.timers.schedule(
            self.settings.retry_delay,
            TimerEvent::RetryConnect {
                address: address.to_string(),
                session: session.generation,
            },
            session.timers.clone(),
        );
    }

    pub(crate) async fn on_retry_timer(&mut self, address: &str, generation: u64) {
        match self.sessions.get(address) {
            Some(s) if s.generation == generation && s.state == ConnectionState::Connecting => {
                info!("Retrying connection to {} (attempt {})", address, s.retry_count + 1);
            }
            _ => return,
        }
        // Retries never surface an issuing error to a caller.
        let _ = self.attempt(address, false).await;
    }

    /// The platform gave up on a link it had accepted to establish.
    pub async fn on_connection_failed(&mut self, address: &str, reason: &str) {
        self.handle_failed_attempt(address, reason).await;
    }

    /// Applies a link-level state change reported by the platform.
    pub async fn on_link_state(&mut self, address: &str, state: LinkState, name: Option<String>) {
        match state {
            LinkState::Connected => self.on_connected(address, name).await,
            LinkState::Disconnected => self.on_disconnected(address).await,
        }
    }

    async fn on_connected(&mut self, address: &str, name: Option<String>) {
        let Some(session) = self.sessions.get_mut(address) else {
            warn!("Connected event for {} without a session, tearing the link down", address);
            if let Err(e) = self.platform.disconnect(address).await {
                debug!("Disconnect of stale link {} failed: {}", address, e);
            }
            self.platform.close(address).await;
            return;
        };
        if session.state != ConnectionState::Connecting {
            debug!("Connected event for {} ignored in {:?}", address, session.state);
            return;
        }

        session.state = ConnectionState::Connected;
        session.retry_count = 0;
        session.catalog.clear();
        session.link = Some(GattLink {
            mtu: self.settings.default_mtu,
            connected_at: Utc::now(),
        });

        let name = name.or_else(|| self.registry.name_of(address));
        self.registry.record(address, name.as_deref());
        info!("Connected to {} ({:?})", address, name);
        self.events.deliver(BleEvent::DeviceConnected {
            address: address.to_string(),
        });

        self.timers.schedule(
            self.settings.settle_delay,
            TimerEvent::DiscoverServices {
                address: address.to_string(),
                session: session.generation,
            },
            session.timers.clone(),
        );
    }

    async fn on_disconnected(&mut self, address: &str) {
        let state = match self.sessions.get(address) {
            Some(session) => session.state,
            None => {
                debug!("Disconnected event for {} without a session", address);
                return;
            }
        };

        if state == ConnectionState::Connecting {
            self.handle_failed_attempt(address, "link dropped while connecting")
                .await;
            return;
        }

        self.finish_session(address).await;
    }

    async fn finish_session(&mut self, address: &str) {
        if let Some(session) = self.remove_session(address) {
            if let Some(link) = session.link {
                info!(
                    "Disconnected from {} after {}s",
                    address,
                    (Utc::now() - link.connected_at).num_seconds()
                );
            } else {
                info!("Disconnected from {}", address);
            }
        }
        self.registry.forget(address);
        self.platform.close(address).await;
        self.events.deliver(BleEvent::DeviceDisconnected {
            address: address.to_string(),
        });
    }

    pub(crate) async fn on_discovery_timer(&mut self, address: &str, generation: u64) {
        match self.sessions.get_mut(address) {
            Some(s) if s.generation == generation && s.is_connected() => s.discovery_pending = true,
            _ => return,
        }

        info!("Discovering services on {}...", address);
        if let Err(e) = self.platform.discover_services(address).await {
            error!("Failed to start service discovery on {}: {}", address, e);
            if let Some(session) = self.sessions.get_mut(address) {
                session.discovery_pending = false;
            }
            self.events.deliver(BleEvent::error(format!(
                "Service discovery failed for device: {address}"
            )));
        }
    }

    /// Rebuilds the catalog and reports every service, each followed by its
    /// characteristics, in the order the platform listed them.
    pub fn on_services_discovered(
        &mut self,
        address: &str,
        status: GattStatus,
        services: Vec<DiscoveredService>,
    ) {
        let Some(session) = self.sessions.get_mut(address).filter(|s| s.is_connected()) else {
            debug!("Service discovery result for {} dropped, not connected", address);
            return;
        };
        if !session.discovery_pending {
            debug!("Service discovery result for {} dropped, none requested", address);
            return;
        }
        session.discovery_pending = false;

        if !status.is_success() {
            error!("Service discovery failed for {}: {:?}", address, status);
            self.events.deliver(BleEvent::error(format!(
                "Service discovery failed for device: {address}"
            )));
            return;
        }

        session.catalog.rebuild(services);
        for service in session.catalog.services() {
            let service_uuid = to_canonical_string(&service.uuid);
            debug!("Found service {} on {}", service_uuid, address);
            self.events.deliver(BleEvent::ServiceDiscovered {
                address: address.to_string(),
                service_uuid: service_uuid.clone(),
            });
            for characteristic in &service.characteristics {
                self.events.deliver(BleEvent::CharacteristicDiscovered {
                    address: address.to_string(),
                    service_uuid: service_uuid.clone(),
                    characteristic_uuid: to_canonical_string(&characteristic.uuid),
                });
            }
        }
    }

    /// Requests termination of the session for `address`.
    pub async fn disconnect(&mut self, address: &str) -> Result<(), BleError> {
        let Some(state) = self.sessions.get(address).map(|s| s.state) else {
            warn!("Disconnect ignored, no session for {}", address);
            return Ok(());
        };

        match state {
            ConnectionState::Connecting => {
                info!("Abandoning connection attempt to {}", address);
                self.remove_session(address);
                if let Err(e) = self.platform.disconnect(address).await {
                    debug!("Disconnect of pending link {} failed: {}", address, e);
                }
                self.registry.forget(address);
                self.platform.close(address).await;
                self.events.deliver(BleEvent::DeviceDisconnected {
                    address: address.to_string(),
                });
                Ok(())
            }
            ConnectionState::Connected => {
                info!("Disconnecting from device {}", address);
                self.set_state(address, ConnectionState::Disconnecting);
                if let Err(e) = self.platform.disconnect(address).await {
                    error!("Failed to disconnect {}: {}", address, e);
                    self.set_state(address, ConnectionState::Connected);
                    return Err(BleError::RequestRejected(format!(
                        "Failed to disconnect {address}: {e}"
                    )));
                }
                Ok(())
            }
            _ => {
                debug!("Disconnect of {} already pending", address);
                Ok(())
            }
        }
    }

    pub async fn disconnect_all(&mut self) {
        let addresses: Vec<String> = self.sessions.keys().cloned().collect();
        for address in addresses {
            if let Err(e) = self.disconnect(&address).await {
                error!("Error disconnecting {}: {}", address, e);
            }
        }
    }

    pub async fn set_connection_priority(
        &mut self,
        address: &str,
        priority: ConnectionPriority,
    ) -> Result<(), BleError> {
        self.connected(address)?;
        self.platform
            .request_connection_priority(address, priority)
            .await
            .map_err(|e| {
                error!("Connection priority request for {} failed: {}", address, e);
                BleError::RequestRejected(format!("connection priority for {address}: {e}"))
            })?;
        info!("Connection priority for {} set to {:?}", address, priority);
        Ok(())
    }

    /// The session for `address`, provided it is Connected.
    pub fn connected(&self, address: &str) -> Result<&ConnectionSession, BleError> {
        self.sessions
            .get(address)
            .filter(|s| s.is_connected())
            .ok_or_else(|| BleError::NotConnected(address.to_string()))
    }

    pub fn connected_mut(&mut self, address: &str) -> Result<&mut ConnectionSession, BleError> {
        self.sessions
            .get_mut(address)
            .filter(|s| s.is_connected())
            .ok_or_else(|| BleError::NotConnected(address.to_string()))
    }

    /// Addresses with a live session, in any state.
    pub fn addresses(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn state(&self, address: &str) -> Option<ConnectionState> {
        self.sessions.get(address).map(|s| s.state)
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.connected(address).is_ok()
    }

    fn set_state(&mut self, address: &str, state: ConnectionState) {
        if let Some(session) = self.sessions.get_mut(address) {
            session.state = state;
        }
    }

    fn remove_session(&mut self, address: &str) -> Option<ConnectionSession> {
        let session = self.sessions.remove(address)?;
        session.timers.cancel();
        Some(session)
    }
}
