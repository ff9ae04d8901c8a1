//! `RadioPlatform` on top of the bluest crate
//! Every radio operation runs on its own task and reports its outcome as a
//! `RadioEvent`, the same way a callback-driven stack would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluest::{Adapter, AdvertisingDevice, Characteristic, ConnectionEvent, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{
    DISABLE_NOTIFICATION_VALUE, GATT_FAILURE, UUID_CLIENT_CHARACTERISTIC_CONFIG,
};
use crate::core::bluetooth::error::PlatformError;
use crate::core::bluetooth::events::{RadioEvent, RadioEventSender};
use crate::core::bluetooth::platform::RadioPlatform;
use crate::core::bluetooth::types::{
    AdapterState, Advertisement, ConnectionPriority, DiscoveredCharacteristic, DiscoveredService,
    GattStatus, GattTarget, LinkState, WriteType,
};

/// Scan failure code reported when the platform scanner cannot start
const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;

/// AD type of manufacturer specific data
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Platform resources held for one address
#[derive(Default)]
struct LinkResources {
    monitor: Option<CancellationToken>,
    characteristics: HashMap<GattTarget, Characteristic>,
    notifications: HashMap<GattTarget, CancellationToken>,
}

impl LinkResources {
    fn release(self) {
        if let Some(monitor) = self.monitor {
            monitor.cancel();
        }
        for token in self.notifications.into_values() {
            token.cancel();
        }
    }
}

type Shared<T> = Arc<Mutex<T>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BluestPlatform {
    adapter: Adapter,
    radio: RadioEventSender,
    /// address -> device handle seen while scanning
    devices: Shared<HashMap<String, Device>>,
    links: Shared<HashMap<String, LinkResources>>,
    scan_cancel: Mutex<Option<CancellationToken>>,
}

impl BluestPlatform {
    /// Opens the default adapter and waits for it to become available.
    pub async fn new(radio: RadioEventSender) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        Ok(Self {
            adapter,
            radio,
            devices: Arc::new(Mutex::new(HashMap::new())),
            links: Arc::new(Mutex::new(HashMap::new())),
            scan_cancel: Mutex::new(None),
        })
    }

    /// Address used by the core for a device: the MAC in its platform id
    /// when there is one, the id itself otherwise.
    fn address_of(device: &Device) -> String {
        let id = device.id().to_string();
        extract_mac_address(&id).unwrap_or(id)
    }

    async fn device(&self, address: &str) -> Result<Device, PlatformError> {
        let cached = lock(&self.devices).get(address).cloned();
        if let Some(device) = cached {
            return Ok(device);
        }

        let connected = self
            .adapter
            .connected_devices()
            .await
            .map_err(|e| PlatformError::Rejected(e.to_string()))?;
        let device = connected
            .into_iter()
            .find(|d| Self::address_of(d) == address)
            .ok_or_else(|| PlatformError::UnknownDevice(address.to_string()))?;
        lock(&self.devices).insert(address.to_string(), device.clone());
        Ok(device)
    }

    fn characteristic(&self, address: &str, target: GattTarget) -> Result<Characteristic, PlatformError> {
        lock(&self.links)
            .get(address)
            .and_then(|link| link.characteristics.get(&target).cloned())
            .ok_or_else(|| {
                PlatformError::Rejected(format!(
                    "characteristic {} not discovered on {}",
                    target.characteristic, address
                ))
            })
    }

    fn post(radio: &RadioEventSender, event: RadioEvent) {
        if radio.send(event).is_err() {
            debug!("Radio channel closed, dropping completion");
        }
    }

    async fn scan_task(
        adapter: Adapter,
        filters: Vec<Uuid>,
        devices: Shared<HashMap<String, Device>>,
        radio: RadioEventSender,
        cancel_token: CancellationToken,
    ) {
        info!("Starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&filters).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start bluetooth scan: {}", e);
                Self::post(&radio, RadioEvent::ScanFailed {
                    code: SCAN_FAILED_INTERNAL_ERROR,
                });
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered_device) => {
                            let advertisement = Self::to_advertisement(&discovered_device);
                            lock(&devices).insert(advertisement.address.clone(), discovered_device.device);
                            Self::post(&radio, RadioEvent::Advertisement(advertisement));
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    }

    fn to_advertisement(discovered: &AdvertisingDevice) -> Advertisement {
        let adv_data = &discovered.adv_data;
        let mut payload = Vec::new();
        if let Some(manufacturer) = &adv_data.manufacturer_data {
            // length byte covers the type, the company id and the data
            let length = (manufacturer.data.len() + 3).min(u8::MAX as usize) as u8;
            payload.push(length);
            payload.push(AD_TYPE_MANUFACTURER_DATA);
            payload.extend_from_slice(&manufacturer.company_id.to_le_bytes());
            payload.extend_from_slice(&manufacturer.data);
        }

        Advertisement {
            address: Self::address_of(&discovered.device),
            name: adv_data
                .local_name
                .clone()
                .or_else(|| discovered.device.name().ok()),
            rssi: discovered.rssi.unwrap_or(0),
            payload,
            service_uuids: adv_data.services.to_vec(),
        }
    }

    async fn monitor_link(
        adapter: Adapter,
        device: Device,
        address: String,
        radio: RadioEventSender,
        cancel_token: CancellationToken,
    ) {
        let mut events = match adapter.device_connection_events(&device).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Link monitoring unavailable for {}: {}", address, e);
                return;
            }
        };

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(ConnectionEvent::Disconnected) => {
                        info!("Link to {} lost", address);
                        Self::post(&radio, RadioEvent::ConnectionStateChanged {
                            address: address.clone(),
                            state: LinkState::Disconnected,
                            name: None,
                        });
                        break;
                    }
                    Some(ConnectionEvent::Connected) => {}
                    None => {
                        debug!("Connection event stream for {} ended", address);
                        break;
                    }
                },
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    async fn enumerate(
        device: &Device,
    ) -> Result<(Vec<DiscoveredService>, HashMap<GattTarget, Characteristic>), bluest::Error> {
        let mut services = Vec::new();
        let mut handles = HashMap::new();

        for service in device.discover_services().await? {
            let service_uuid = service.uuid();
            let mut characteristics = Vec::new();

            for characteristic in service.discover_characteristics().await? {
                let uuid = characteristic.uuid();
                let mut descriptors: Vec<Uuid> = match characteristic.discover_descriptors().await {
                    Ok(descriptors) => descriptors.iter().map(|d| d.uuid()).collect(),
                    Err(e) => {
                        debug!("Descriptor discovery for {} failed: {}", uuid, e);
                        Vec::new()
                    }
                };
                // Some backends hide the CCCD; a notifiable characteristic always has one.
                let notifiable = characteristic
                    .properties()
                    .await
                    .map(|p| p.notify || p.indicate)
                    .unwrap_or(false);
                if notifiable && !descriptors.contains(&UUID_CLIENT_CHARACTERISTIC_CONFIG) {
                    descriptors.push(UUID_CLIENT_CHARACTERISTIC_CONFIG);
                }

                characteristics.push(DiscoveredCharacteristic::new(uuid, descriptors));
                handles.insert(
                    GattTarget {
                        service: service_uuid,
                        characteristic: uuid,
                    },
                    characteristic,
                );
            }

            services.push(DiscoveredService::new(service_uuid, characteristics));
        }

        Ok((services, handles))
    }

    async fn notification_task(
        characteristic: Characteristic,
        address: String,
        target: GattTarget,
        radio: RadioEventSender,
        cancel_token: CancellationToken,
    ) {
        info!("Subscribing to notifications on {}...", target.characteristic);
        let mut notification_stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                Self::post(&radio, RadioEvent::DescriptorWritten {
                    address,
                    characteristic: target.characteristic,
                    descriptor: UUID_CLIENT_CHARACTERISTIC_CONFIG,
                    status: GattStatus::Failure(GATT_FAILURE),
                });
                return;
            }
        };

        Self::post(&radio, RadioEvent::DescriptorWritten {
            address: address.clone(),
            characteristic: target.characteristic,
            descriptor: UUID_CLIENT_CHARACTERISTIC_CONFIG,
            status: GattStatus::Success,
        });

        loop {
            tokio::select! {
                result = notification_stream.next() => match result {
                    Some(Ok(value)) => Self::post(&radio, RadioEvent::CharacteristicChanged {
                        address: address.clone(),
                        characteristic: target.characteristic,
                        value,
                    }),
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        break;
                    }
                    None => break,
                },
                _ = cancel_token.cancelled() => break,
            }
        }

        info!("Notification stream for {} ended", target.characteristic);
    }
}

#[async_trait]
impl RadioPlatform for BluestPlatform {
    async fn adapter_state(&self) -> AdapterState {
        match self.adapter.is_available().await {
            Ok(true) => AdapterState::PoweredOn,
            Ok(false) => AdapterState::PoweredOff,
            Err(e) => {
                warn!("Failed to query adapter state: {}", e);
                AdapterState::Unknown
            }
        }
    }

    async fn start_scan(&self, service_filters: &[Uuid]) -> Result<(), PlatformError> {
        let cancel_token = CancellationToken::new();
        if let Some(previous) = lock(&self.scan_cancel).replace(cancel_token.clone()) {
            previous.cancel();
        }

        tokio::spawn(Self::scan_task(
            self.adapter.clone(),
            service_filters.to_vec(),
            self.devices.clone(),
            self.radio.clone(),
            cancel_token,
        ));
        info!("Device scan task started.");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        info!("Stopping Bluetooth scan.");
        if let Some(cancel_token) = lock(&self.scan_cancel).take() {
            cancel_token.cancel();
        }
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<(), PlatformError> {
        let device = self.device(address).await?;
        let monitor = CancellationToken::new();
        if let Some(previous) = lock(&self.links).insert(
            address.to_string(),
            LinkResources {
                monitor: Some(monitor.clone()),
                ..LinkResources::default()
            },
        ) {
            previous.release();
        }

        let adapter = self.adapter.clone();
        let radio = self.radio.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            info!("Initiating connection to {}...", address);
            match adapter.connect_device(&device).await {
                Ok(()) => {
                    Self::post(&radio, RadioEvent::ConnectionStateChanged {
                        address: address.clone(),
                        state: LinkState::Connected,
                        name: device.name().ok(),
                    });
                    Self::monitor_link(adapter, device, address, radio, monitor).await;
                }
                Err(e) => Self::post(&radio, RadioEvent::ConnectionFailed {
                    address,
                    reason: e.to_string(),
                }),
            }
        });
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<(), PlatformError> {
        let device = self.device(address).await?;
        if let Some(monitor) = lock(&self.links)
            .get_mut(address)
            .and_then(|link| link.monitor.take())
        {
            monitor.cancel();
        }

        let adapter = self.adapter.clone();
        let radio = self.radio.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            info!("Disconnecting from device {}", address);
            if let Err(e) = adapter.disconnect_device(&device).await {
                error!("Failed to disconnect {}: {}", address, e);
            }
            Self::post(&radio, RadioEvent::ConnectionStateChanged {
                address,
                state: LinkState::Disconnected,
                name: None,
            });
        });
        Ok(())
    }

    async fn close(&self, address: &str) {
        if let Some(link) = lock(&self.links).remove(address) {
            debug!("Releasing link resources for {}", address);
            link.release();
        }
    }

    fn forget_devices(&self, keep: &[String]) {
        let mut devices = lock(&self.devices);
        let before = devices.len();
        devices.retain(|address, _| keep.contains(address));
        debug!("Forgot {} device handle(s)", before - devices.len());
    }

    async fn discover_services(&self, address: &str) -> Result<(), PlatformError> {
        let device = self.device(address).await?;
        let links = self.links.clone();
        let radio = self.radio.clone();
        let address = address.to_string();

        tokio::spawn(async move {
            match Self::enumerate(&device).await {
                Ok((services, handles)) => {
                    lock(&links)
                        .entry(address.clone())
                        .or_default()
                        .characteristics = handles;
                    Self::post(&radio, RadioEvent::ServicesDiscovered {
                        address,
                        status: GattStatus::Success,
                        services,
                    });
                }
                Err(e) => {
                    error!("Service discovery on {} failed: {}", address, e);
                    Self::post(&radio, RadioEvent::ServicesDiscovered {
                        address,
                        status: GattStatus::Failure(GATT_FAILURE),
                        services: Vec::new(),
                    });
                }
            }
        });
        Ok(())
    }

    async fn set_notification(
        &self,
        address: &str,
        target: GattTarget,
        _enable: bool,
    ) -> Result<(), PlatformError> {
        // bluest ties local delivery to the CCCD write, see `write_descriptor`.
        self.characteristic(address, target).map(|_| ())
    }

    async fn write_descriptor(
        &self,
        address: &str,
        target: GattTarget,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        if descriptor != UUID_CLIENT_CHARACTERISTIC_CONFIG {
            return Err(PlatformError::Unsupported);
        }
        let characteristic = self.characteristic(address, target)?;

        let cancel_token = CancellationToken::new();
        let previous = {
            let mut links = lock(&self.links);
            let link = links.entry(address.to_string()).or_default();
            if value == &DISABLE_NOTIFICATION_VALUE[..] {
                link.notifications.remove(&target)
            } else {
                link.notifications.insert(target, cancel_token.clone())
            }
        };
        if let Some(previous) = previous {
            previous.cancel();
        }

        if value == &DISABLE_NOTIFICATION_VALUE[..] {
            Self::post(&self.radio, RadioEvent::DescriptorWritten {
                address: address.to_string(),
                characteristic: target.characteristic,
                descriptor,
                status: GattStatus::Success,
            });
            return Ok(());
        }

        tokio::spawn(Self::notification_task(
            characteristic,
            address.to_string(),
            target,
            self.radio.clone(),
            cancel_token,
        ));
        Ok(())
    }

    async fn read_characteristic(&self, address: &str, target: GattTarget) -> Result<(), PlatformError> {
        let characteristic = self.characteristic(address, target)?;
        let radio = self.radio.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            let (status, value) = match characteristic.read().await {
                Ok(value) => (GattStatus::Success, value),
                Err(e) => {
                    error!("Read of {} failed: {}", target.characteristic, e);
                    (GattStatus::Failure(GATT_FAILURE), Vec::new())
                }
            };
            Self::post(&radio, RadioEvent::CharacteristicRead {
                address,
                characteristic: target.characteristic,
                status,
                value,
            });
        });
        Ok(())
    }

    async fn write_characteristic(
        &self,
        address: &str,
        target: GattTarget,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), PlatformError> {
        let characteristic = self.characteristic(address, target)?;
        let radio = self.radio.clone();
        let address = address.to_string();
        let value = value.to_vec();
        tokio::spawn(async move {
            let result = match write_type {
                WriteType::WithResponse => characteristic.write(&value).await,
                WriteType::WithoutResponse => characteristic.write_without_response(&value).await,
            };
            let status = match result {
                Ok(()) => GattStatus::Success,
                Err(e) => {
                    error!("Write to {} failed: {}", target.characteristic, e);
                    GattStatus::Failure(GATT_FAILURE)
                }
            };
            Self::post(&radio, RadioEvent::CharacteristicWritten {
                address,
                characteristic: target.characteristic,
                status,
            });
        });
        Ok(())
    }

    fn supports_mtu_negotiation(&self) -> bool {
        false
    }

    async fn request_mtu(&self, _address: &str, _mtu: u16) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    async fn read_rssi(&self, address: &str) -> Result<(), PlatformError> {
        let device = self.device(address).await?;
        let radio = self.radio.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            let (status, rssi) = match device.rssi().await {
                Ok(rssi) => (GattStatus::Success, rssi),
                Err(e) => {
                    error!("RSSI read on {} failed: {}", address, e);
                    (GattStatus::Failure(GATT_FAILURE), 0)
                }
            };
            Self::post(&radio, RadioEvent::RssiRead {
                address,
                rssi,
                status,
            });
        });
        Ok(())
    }

    async fn request_connection_priority(
        &self,
        address: &str,
        priority: ConnectionPriority,
    ) -> Result<(), PlatformError> {
        debug!("Connection priority {:?} for {} not supported", priority, address);
        Err(PlatformError::Unsupported)
    }
}

/// Last MAC address embedded in a platform device id, upper-cased and
/// colon-separated.
fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}([0-9A-Fa-f]{2})").ok()?;
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
}
