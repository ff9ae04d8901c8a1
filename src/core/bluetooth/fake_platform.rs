//! Scripted radio platform for tests
//! Records every issued call and, when given a radio channel, answers with
//! the completions a well-behaved stack would report.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::bluetooth::error::PlatformError;
use crate::core::bluetooth::events::{RadioEvent, RadioEventSender};
use crate::core::bluetooth::platform::RadioPlatform;
use crate::core::bluetooth::types::{
    AdapterState, ConnectionPriority, DiscoveredService, GattStatus, GattTarget, LinkState,
    WriteType,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlatformCall {
    StartScan(Vec<Uuid>),
    StopScan,
    Connect(String),
    Disconnect(String),
    Close(String),
    ForgetDevices(Vec<String>),
    DiscoverServices(String),
    SetNotification(String, GattTarget, bool),
    WriteDescriptor(String, GattTarget, Uuid, Vec<u8>),
    ReadCharacteristic(String, GattTarget),
    WriteCharacteristic(String, GattTarget, Vec<u8>, WriteType),
    RequestMtu(String, u16),
    ReadRssi(String),
    RequestConnectionPriority(String, ConnectionPriority),
}

struct Script {
    adapter_state: AdapterState,
    permissions: bool,
    mtu_negotiation: bool,
    auto_connect: bool,
    device_name: Option<String>,
    connect_failure: Option<PlatformError>,
    connect_failures: HashMap<String, PlatformError>,
    gatt_failure: Option<PlatformError>,
    services: Vec<DiscoveredService>,
    read_value: Vec<u8>,
    priority_delay: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            adapter_state: AdapterState::PoweredOn,
            permissions: true,
            mtu_negotiation: false,
            auto_connect: true,
            device_name: None,
            connect_failure: None,
            connect_failures: HashMap::new(),
            gatt_failure: None,
            services: Vec::new(),
            read_value: Vec::new(),
            priority_delay: None,
        }
    }
}

pub(crate) struct FakePlatform {
    calls: Mutex<Vec<PlatformCall>>,
    script: Mutex<Script>,
    radio: Option<RadioEventSender>,
}

impl FakePlatform {
    /// A platform that accepts everything and never reports completions.
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(Script::default()),
            radio: None,
        }
    }

    /// A platform that reports completions on `radio`.
    pub(crate) fn with_radio(radio: RadioEventSender) -> Self {
        Self {
            radio: Some(radio),
            ..Self::new()
        }
    }

    pub(crate) fn calls(&self) -> Vec<PlatformCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&PlatformCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn set_adapter_state(&self, state: AdapterState) {
        self.script().adapter_state = state;
    }

    pub(crate) fn set_permissions(&self, granted: bool) {
        self.script().permissions = granted;
    }

    pub(crate) fn set_mtu_negotiation(&self, supported: bool) {
        self.script().mtu_negotiation = supported;
    }

    pub(crate) fn set_auto_connect(&self, enabled: bool) {
        self.script().auto_connect = enabled;
    }

    pub(crate) fn set_device_name(&self, name: &str) {
        self.script().device_name = Some(name.to_string());
    }

    pub(crate) fn fail_connect_with(&self, err: PlatformError) {
        self.script().connect_failure = Some(err);
    }

    pub(crate) fn fail_connect_to(&self, address: &str, err: PlatformError) {
        self.script().connect_failures.insert(address.to_string(), err);
    }

    pub(crate) fn fail_gatt_with(&self, err: PlatformError) {
        self.script().gatt_failure = Some(err);
    }

    pub(crate) fn set_services(&self, services: Vec<DiscoveredService>) {
        self.script().services = services;
    }

    pub(crate) fn set_read_value(&self, value: &[u8]) {
        self.script().read_value = value.to_vec();
    }

    pub(crate) fn delay_priority(&self, delay: Duration) {
        self.script().priority_delay = Some(delay);
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: PlatformCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn post(&self, event: RadioEvent) {
        if let Some(radio) = &self.radio {
            let _ = radio.send(event);
        }
    }

    fn gatt_result(&self) -> Result<(), PlatformError> {
        match &self.script().gatt_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RadioPlatform for FakePlatform {
    async fn adapter_state(&self) -> AdapterState {
        self.script().adapter_state
    }

    fn has_permissions(&self) -> bool {
        self.script().permissions
    }

    async fn start_scan(&self, service_filters: &[Uuid]) -> Result<(), PlatformError> {
        self.record(PlatformCall::StartScan(service_filters.to_vec()));
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        self.record(PlatformCall::StopScan);
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<(), PlatformError> {
        self.record(PlatformCall::Connect(address.to_string()));
        let (failure, auto_connect, name) = {
            let script = self.script();
            (
                script
                    .connect_failure
                    .clone()
                    .or_else(|| script.connect_failures.get(address).cloned()),
                script.auto_connect,
                script.device_name.clone(),
            )
        };
        if let Some(err) = failure {
            return Err(err);
        }
        if auto_connect {
            self.post(RadioEvent::ConnectionStateChanged {
                address: address.to_string(),
                state: LinkState::Connected,
                name,
            });
        }
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<(), PlatformError> {
        self.record(PlatformCall::Disconnect(address.to_string()));
        self.post(RadioEvent::ConnectionStateChanged {
            address: address.to_string(),
            state: LinkState::Disconnected,
            name: None,
        });
        Ok(())
    }

    async fn close(&self, address: &str) {
        self.record(PlatformCall::Close(address.to_string()));
    }

    fn forget_devices(&self, keep: &[String]) {
        self.record(PlatformCall::ForgetDevices(keep.to_vec()));
    }

    async fn discover_services(&self, address: &str) -> Result<(), PlatformError> {
        self.record(PlatformCall::DiscoverServices(address.to_string()));
        let services = self.script().services.clone();
        self.post(RadioEvent::ServicesDiscovered {
            address: address.to_string(),
            status: GattStatus::Success,
            services,
        });
        Ok(())
    }

    async fn set_notification(
        &self,
        address: &str,
        target: GattTarget,
        enable: bool,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::SetNotification(address.to_string(), target, enable));
        self.gatt_result()
    }

    async fn write_descriptor(
        &self,
        address: &str,
        target: GattTarget,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::WriteDescriptor(
            address.to_string(),
            target,
            descriptor,
            value.to_vec(),
        ));
        self.gatt_result()?;
        self.post(RadioEvent::DescriptorWritten {
            address: address.to_string(),
            characteristic: target.characteristic,
            descriptor,
            status: GattStatus::Success,
        });
        Ok(())
    }

    async fn read_characteristic(
        &self,
        address: &str,
        target: GattTarget,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::ReadCharacteristic(address.to_string(), target));
        self.gatt_result()?;
        let value = self.script().read_value.clone();
        self.post(RadioEvent::CharacteristicRead {
            address: address.to_string(),
            characteristic: target.characteristic,
            status: GattStatus::Success,
            value,
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
        self.record(PlatformCall::WriteCharacteristic(
            address.to_string(),
            target,
            value.to_vec(),
            write_type,
        ));
        self.gatt_result()?;
        if write_type == WriteType::WithResponse {
            self.post(RadioEvent::CharacteristicWritten {
                address: address.to_string(),
                characteristic: target.characteristic,
                status: GattStatus::Success,
            });
        }
        Ok(())
    }

    fn supports_mtu_negotiation(&self) -> bool {
        self.script().mtu_negotiation
    }

    async fn request_mtu(&self, address: &str, mtu: u16) -> Result<(), PlatformError> {
        self.record(PlatformCall::RequestMtu(address.to_string(), mtu));
        self.gatt_result()?;
        self.post(RadioEvent::MtuChanged {
            address: address.to_string(),
            mtu,
            status: GattStatus::Success,
        });
        Ok(())
    }

    async fn read_rssi(&self, address: &str) -> Result<(), PlatformError> {
        self.record(PlatformCall::ReadRssi(address.to_string()));
        self.gatt_result()?;
        self.post(RadioEvent::RssiRead {
            address: address.to_string(),
            rssi: -55,
            status: GattStatus::Success,
        });
        Ok(())
    }

    async fn request_connection_priority(
        &self,
        address: &str,
        priority: ConnectionPriority,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::RequestConnectionPriority(
            address.to_string(),
            priority,
        ));
        let delay = self.script().priority_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.gatt_result()
    }
}
