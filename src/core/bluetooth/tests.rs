//! Scenario tests for the command context against a scripted platform.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::config::central_config::CentralConfig;
use crate::core::bluetooth::constants::UUID_CLIENT_CHARACTERISTIC_CONFIG;
use crate::core::bluetooth::error::{BleError, PlatformError};
use crate::core::bluetooth::events::{radio_channel, BleEvent, RadioEvent, RadioEventSender};
use crate::core::bluetooth::fake_platform::{FakePlatform, PlatformCall};
use crate::core::bluetooth::manager::BluetoothManager;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{
    Advertisement, ConnectionPriority, ConnectionState, DiscoveredCharacteristic,
    DiscoveredService, LinkState,
};

const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
const HEART_RATE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
const MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
const BODY_LOCATION: Uuid = Uuid::from_u128(0x00002a38_0000_1000_8000_00805f9b34fb);
const BATTERY: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

struct Rig {
    manager: BluetoothManager,
    platform: Arc<FakePlatform>,
    radio: RadioEventSender,
    events: mpsc::UnboundedReceiver<BleEvent>,
    registry: Arc<DeviceRegistry>,
}

impl Rig {
    fn new() -> Self {
        let (radio, radio_rx) = radio_channel();
        let platform = Arc::new(FakePlatform::with_radio(radio.clone()));
        let (tx, events) = mpsc::unbounded_channel();
        let registry = Arc::new(DeviceRegistry::new());
        let manager = BluetoothManager::spawn(
            platform.clone(),
            radio_rx,
            Arc::new(tx),
            registry.clone(),
            &CentralConfig::default(),
        );
        Self {
            manager,
            platform,
            radio,
            events,
            registry,
        }
    }

    async fn initialized() -> Self {
        let mut rig = Self::new();
        rig.manager.initialize(true, false).await.unwrap();
        assert_eq!(rig.next_event().await, BleEvent::Initialized);
        rig
    }

    /// Initialized rig with `ADDRESS` connected and its services discovered.
    async fn connected() -> Self {
        let mut rig = Self::initialized().await;
        rig.platform.set_device_name("Sensor1");
        rig.platform.set_services(heart_rate_services());
        rig.manager.connect(ADDRESS).await.unwrap();
        assert_eq!(rig.next_event().await, connected_event());
        // one service and two characteristics, then one service and one
        for _ in 0..5 {
            rig.next_event().await;
        }
        rig
    }

    async fn next_event(&mut self) -> BleEvent {
        timeout(Duration::from_secs(120), self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    fn connect_calls(&self) -> usize {
        self.platform
            .count(|c| matches!(c, PlatformCall::Connect(_)))
    }
}

fn heart_rate_services() -> Vec<DiscoveredService> {
    vec![
        DiscoveredService::new(
            HEART_RATE,
            vec![
                DiscoveredCharacteristic::new(MEASUREMENT, vec![UUID_CLIENT_CHARACTERISTIC_CONFIG]),
                DiscoveredCharacteristic::new(BODY_LOCATION, vec![]),
            ],
        ),
        DiscoveredService::new(
            BATTERY,
            vec![DiscoveredCharacteristic::new(BATTERY_LEVEL, vec![])],
        ),
    ]
}

fn connected_event() -> BleEvent {
    BleEvent::DeviceConnected {
        address: ADDRESS.into(),
    }
}

fn canonical(uuid: Uuid) -> String {
    uuid.hyphenated().to_string().to_uppercase()
}

#[tokio::test(start_paused = true)]
async fn discover_connect_and_enumerate_services_in_order() {
    let mut rig = Rig::initialized().await;
    rig.platform.set_services(heart_rate_services());

    rig.manager.start_scan(&[], true).await.unwrap();
    rig.radio
        .send(RadioEvent::Advertisement(Advertisement {
            address: ADDRESS.into(),
            name: Some("Sensor1".into()),
            rssi: -60,
            payload: vec![0x02, 0x01, 0x06],
            service_uuids: vec![HEART_RATE],
        }))
        .unwrap();

    assert_eq!(
        rig.next_event().await,
        BleEvent::DeviceDiscovered {
            address: ADDRESS.into(),
            name: Some("Sensor1".into()),
            signal_strength: -60,
            advertising_payload: vec![0x02, 0x01, 0x06],
        }
    );

    rig.manager.connect(ADDRESS).await.unwrap();
    assert_eq!(rig.next_event().await, connected_event());

    let service = |uuid| BleEvent::ServiceDiscovered {
        address: ADDRESS.into(),
        service_uuid: canonical(uuid),
    };
    let characteristic = |service, uuid| BleEvent::CharacteristicDiscovered {
        address: ADDRESS.into(),
        service_uuid: canonical(service),
        characteristic_uuid: canonical(uuid),
    };
    let expected = vec![
        service(HEART_RATE),
        characteristic(HEART_RATE, MEASUREMENT),
        characteristic(HEART_RATE, BODY_LOCATION),
        service(BATTERY),
        characteristic(BATTERY, BATTERY_LEVEL),
    ];
    for event in expected {
        assert_eq!(rig.next_event().await, event);
    }

    assert!(rig.manager.is_connected(ADDRESS).await);
    // the advertised name survives the connection handshake
    assert_eq!(rig.registry.resolve("sensor1").as_deref(), Some(ADDRESS));
}

#[tokio::test(start_paused = true)]
async fn service_discovery_waits_for_settle_delay() {
    let mut rig = Rig::initialized().await;
    rig.manager.connect(ADDRESS).await.unwrap();
    assert_eq!(rig.next_event().await, connected_event());

    sleep(Duration::from_millis(500)).await;
    assert_eq!(rig.platform.count(|c| matches!(c, PlatformCall::DiscoverServices(_))), 0);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(rig.platform.count(|c| matches!(c, PlatformCall::DiscoverServices(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_is_a_no_op() {
    let mut rig = Rig::connected().await;

    assert!(matches!(
        rig.manager.connect(ADDRESS).await,
        Err(BleError::AlreadyInProgress(_))
    ));
    sleep(Duration::from_secs(5)).await;

    assert_eq!(rig.connect_calls(), 1);
    assert!(rig.events.try_recv().is_err());
    assert_eq!(
        rig.manager.connection_state(ADDRESS).await,
        Some(ConnectionState::Connected)
    );
}

#[tokio::test(start_paused = true)]
async fn retries_stop_after_three_failed_attempts() {
    let mut rig = Rig::initialized().await;
    rig.platform
        .fail_connect_with(PlatformError::Rejected("gatt busy".into()));

    rig.manager.connect(ADDRESS).await.unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::error(format!("Failed to connect after 3 attempts: {ADDRESS}"))
    );

    sleep(Duration::from_secs(30)).await;
    assert_eq!(rig.connect_calls(), 3);
    assert_eq!(rig.manager.connection_state(ADDRESS).await, None);
    assert!(rig.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_connecting_cancels_pending_retry() {
    let mut rig = Rig::initialized().await;
    rig.platform
        .fail_connect_with(PlatformError::Rejected("gatt busy".into()));

    rig.manager.connect(ADDRESS).await.unwrap();
    assert_eq!(
        rig.manager.connection_state(ADDRESS).await,
        Some(ConnectionState::Connecting)
    );

    rig.manager.disconnect(ADDRESS).await.unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::DeviceDisconnected {
            address: ADDRESS.into()
        }
    );

    sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.connect_calls(), 1);
    assert_eq!(rig.manager.connection_state(ADDRESS).await, None);
}

#[tokio::test(start_paused = true)]
async fn repeated_advertisements_report_once_until_cache_is_cleared() {
    let mut rig = Rig::initialized().await;
    let advertise = |rssi| {
        RadioEvent::Advertisement(Advertisement {
            address: ADDRESS.into(),
            name: Some("Sensor1".into()),
            rssi,
            payload: vec![],
            service_uuids: vec![],
        })
    };

    rig.manager.start_scan(&[], true).await.unwrap();
    for rssi in [-60, -55, -50] {
        rig.radio.send(advertise(rssi)).unwrap();
    }
    assert!(matches!(rig.next_event().await, BleEvent::DeviceDiscovered { .. }));
    sleep(Duration::from_millis(10)).await;
    let cached = rig.manager.scan_result(ADDRESS).await.unwrap();
    assert_eq!(cached.signal_strength, -50);
    assert!(rig.events.try_recv().is_err());

    rig.manager.stop_scan().await.unwrap();
    rig.manager.start_scan(&[], true).await.unwrap();
    rig.radio.send(advertise(-70)).unwrap();
    assert!(matches!(
        rig.next_event().await,
        BleEvent::DeviceDiscovered {
            signal_strength: -70,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn scan_stops_after_timeout() {
    let rig = Rig::initialized().await;
    rig.manager.start_scan(&["180D".to_string()], false).await.unwrap();
    assert!(rig.manager.is_scanning().await);

    sleep(Duration::from_secs(31)).await;
    assert!(!rig.manager.is_scanning().await);
    assert!(rig.platform.calls().contains(&PlatformCall::StopScan));
}

#[tokio::test]
async fn commands_before_initialize_are_rejected() {
    let rig = Rig::new();
    assert_eq!(
        rig.manager.start_scan(&[], false).await,
        Err(BleError::NotInitialized)
    );
    assert_eq!(rig.manager.connect(ADDRESS).await, Err(BleError::NotInitialized));
    assert_eq!(rig.manager.stop_scan().await, Ok(()));
    assert!(!rig.manager.is_scanning().await);
    assert!(rig.platform.calls().is_empty());
}

#[tokio::test]
async fn initialize_requires_a_powered_adapter() {
    let mut rig = Rig::new();
    rig.platform
        .set_adapter_state(crate::core::bluetooth::types::AdapterState::PoweredOff);
    assert_eq!(
        rig.manager.initialize(true, false).await,
        Err(BleError::AdapterUnavailable)
    );
    assert!(rig.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn gatt_commands_need_a_connected_session() {
    let rig = Rig::initialized().await;
    let other = "11:22:33:44:55:66";

    assert_eq!(
        rig.manager.read_characteristic(other, "180d", "2a37").await,
        Err(BleError::NotConnected(other.into()))
    );
    assert_eq!(
        rig.manager.write_characteristic(other, "180d", "2a37", &[1], true).await,
        Err(BleError::NotConnected(other.into()))
    );
    assert_eq!(
        rig.manager.subscribe(other, "180d", "2a37").await,
        Err(BleError::NotConnected(other.into()))
    );
    assert_eq!(
        rig.manager.request_mtu(other, 185).await,
        Err(BleError::NotConnected(other.into()))
    );
    assert_eq!(
        rig.manager.read_rssi(other).await,
        Err(BleError::NotConnected(other.into()))
    );
    assert!(rig.platform.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn subscription_and_notifications_flow_to_events() {
    let mut rig = Rig::connected().await;

    rig.manager.subscribe(ADDRESS, "180d", "2a37").await.unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::NotificationStateChanged {
            address: ADDRESS.into(),
            characteristic_uuid: canonical(MEASUREMENT),
        }
    );

    rig.radio
        .send(RadioEvent::CharacteristicChanged {
            address: ADDRESS.into(),
            characteristic: MEASUREMENT,
            value: vec![],
        })
        .unwrap();
    rig.radio
        .send(RadioEvent::CharacteristicChanged {
            address: ADDRESS.into(),
            characteristic: MEASUREMENT,
            value: vec![0x00, 0x48],
        })
        .unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::DataReceived {
            address: ADDRESS.into(),
            characteristic_uuid: canonical(MEASUREMENT),
            payload: vec![0x00, 0x48],
        }
    );
}

#[tokio::test(start_paused = true)]
async fn reads_and_rssi_arrive_as_events() {
    let mut rig = Rig::connected().await;
    rig.platform.set_read_value(&[0x64]);

    rig.manager
        .read_characteristic(ADDRESS, "180F", "2A19")
        .await
        .unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::DataReceived {
            address: ADDRESS.into(),
            characteristic_uuid: canonical(BATTERY_LEVEL),
            payload: vec![0x64],
        }
    );

    rig.manager.read_rssi(ADDRESS).await.unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::RssiRead {
            address: ADDRESS.into(),
            signal_strength: -55,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn mtu_requests_are_clamped_or_synthesized() {
    let mut rig = Rig::connected().await;

    rig.manager.request_mtu(ADDRESS, 185).await.unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::MtuChanged {
            address: ADDRESS.into(),
            mtu: 23
        }
    );

    rig.platform.set_mtu_negotiation(true);
    rig.manager.request_mtu(ADDRESS, 100_000).await.unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::MtuChanged {
            address: ADDRESS.into(),
            mtu: 512
        }
    );

    assert!(matches!(
        rig.manager.request_mtu(ADDRESS, 0).await,
        Err(BleError::InvalidArgument(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn connection_priority_is_mapped_and_applied() {
    let rig = Rig::connected().await;

    rig.manager.set_connection_priority(ADDRESS, 3).await.unwrap();
    rig.manager.set_connection_priority(ADDRESS, 0).await.unwrap();
    assert!(matches!(
        rig.manager.set_connection_priority(ADDRESS, 9).await,
        Err(BleError::InvalidArgument(_))
    ));

    let requested: Vec<_> = rig
        .platform
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            PlatformCall::RequestConnectionPriority(_, priority) => Some(priority),
            _ => None,
        })
        .collect();
    assert_eq!(
        requested,
        vec![ConnectionPriority::High, ConnectionPriority::Balanced]
    );
}

#[tokio::test(start_paused = true)]
async fn slow_connection_priority_times_out() {
    let rig = Rig::connected().await;
    rig.platform.delay_priority(Duration::from_secs(5));

    assert_eq!(
        rig.manager.set_connection_priority(ADDRESS, 1).await,
        Err(BleError::Timeout(format!("connection priority for {ADDRESS}")))
    );

    // the command context stays usable once the slow request completes
    sleep(Duration::from_secs(5)).await;
    assert!(rig.manager.is_connected(ADDRESS).await);
}

#[tokio::test(start_paused = true)]
async fn link_loss_clears_session_and_name() {
    let mut rig = Rig::connected().await;

    rig.radio
        .send(RadioEvent::ConnectionStateChanged {
            address: ADDRESS.into(),
            state: LinkState::Disconnected,
            name: None,
        })
        .unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::DeviceDisconnected {
            address: ADDRESS.into()
        }
    );
    assert!(!rig.manager.is_connected(ADDRESS).await);
    assert_eq!(rig.registry.resolve("Sensor1"), None);

    // a fresh connect starts over from Connecting
    rig.manager.connect(ADDRESS).await.unwrap();
    assert_eq!(rig.next_event().await, connected_event());
}

#[tokio::test(start_paused = true)]
async fn deinitialize_disconnects_everything() {
    let mut rig = Rig::connected().await;

    rig.manager.deinitialize().await.unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::DeviceDisconnected {
            address: ADDRESS.into()
        }
    );
    assert_eq!(
        rig.manager.start_scan(&[], false).await,
        Err(BleError::NotInitialized)
    );
}

#[tokio::test(start_paused = true)]
async fn connected_event_after_abandoned_connect_tears_link_down() {
    let mut rig = Rig::initialized().await;
    rig.platform.set_auto_connect(false);

    rig.manager.connect(ADDRESS).await.unwrap();
    rig.manager.disconnect(ADDRESS).await.unwrap();
    assert_eq!(
        rig.next_event().await,
        BleEvent::DeviceDisconnected {
            address: ADDRESS.into()
        }
    );

    // the platform finishes the link it was already establishing
    rig.radio
        .send(RadioEvent::ConnectionStateChanged {
            address: ADDRESS.into(),
            state: LinkState::Connected,
            name: None,
        })
        .unwrap();
    sleep(Duration::from_millis(10)).await;

    let disconnects = rig
        .platform
        .count(|c| matches!(c, PlatformCall::Disconnect(_)));
    assert_eq!(disconnects, 2);
    assert_eq!(rig.manager.connection_state(ADDRESS).await, None);
    assert!(rig.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn clearing_the_scan_cache_forgets_devices_without_sessions() {
    let mut rig = Rig::connected().await;

    rig.manager.start_scan(&[], false).await.unwrap();
    for i in 0..200 {
        rig.radio
            .send(RadioEvent::Advertisement(Advertisement {
                address: format!("10:00:00:00:{:02X}:{:02X}", i / 256, i % 256),
                name: Some(format!("Tag{i}")),
                rssi: -80,
                payload: vec![],
                service_uuids: vec![],
            }))
            .unwrap();
    }
    sleep(Duration::from_millis(10)).await;
    assert_eq!(rig.registry.len(), 201);

    rig.manager.stop_scan().await.unwrap();
    rig.manager.start_scan(&[], true).await.unwrap();

    assert_eq!(rig.registry.len(), 1);
    assert_eq!(rig.registry.resolve("Sensor1").as_deref(), Some(ADDRESS));
    assert_eq!(rig.registry.resolve("Tag7"), None);
    assert!(rig
        .platform
        .calls()
        .contains(&PlatformCall::ForgetDevices(vec![ADDRESS.to_string()])));
    while rig.events.try_recv().is_ok() {}
}

#[tokio::test(start_paused = true)]
async fn leftover_discovery_result_does_not_duplicate_services() {
    let mut rig = Rig::connected().await;

    rig.radio
        .send(RadioEvent::ConnectionStateChanged {
            address: ADDRESS.into(),
            state: LinkState::Disconnected,
            name: None,
        })
        .unwrap();
    assert!(matches!(
        rig.next_event().await,
        BleEvent::DeviceDisconnected { .. }
    ));

    rig.manager.connect(ADDRESS).await.unwrap();
    assert_eq!(rig.next_event().await, connected_event());

    // a result queued for the previous link lands before the settle delay
    rig.radio
        .send(RadioEvent::ServicesDiscovered {
            address: ADDRESS.into(),
            status: crate::core::bluetooth::types::GattStatus::Success,
            services: heart_rate_services(),
        })
        .unwrap();

    assert_eq!(
        rig.next_event().await,
        BleEvent::ServiceDiscovered {
            address: ADDRESS.into(),
            service_uuid: canonical(HEART_RATE),
        }
    );
    for _ in 0..4 {
        rig.next_event().await;
    }
    sleep(Duration::from_secs(5)).await;
    assert!(rig.events.try_recv().is_err());
    assert_eq!(
        rig.platform
            .count(|c| matches!(c, PlatformCall::DiscoverServices(_))),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn one_address_exhausting_retries_leaves_another_usable() {
    let mut rig = Rig::initialized().await;
    let failing = "11:22:33:44:55:66";
    rig.platform
        .fail_connect_to(failing, PlatformError::Rejected("out of range".into()));
    rig.platform.set_services(heart_rate_services());

    rig.manager.connect(failing).await.unwrap();
    rig.manager.connect(ADDRESS).await.unwrap();

    assert_eq!(rig.next_event().await, connected_event());
    for _ in 0..5 {
        assert!(matches!(
            rig.next_event().await,
            BleEvent::ServiceDiscovered { .. } | BleEvent::CharacteristicDiscovered { .. }
        ));
    }
    assert_eq!(
        rig.next_event().await,
        BleEvent::error(format!("Failed to connect after 3 attempts: {failing}"))
    );

    assert_eq!(rig.manager.connection_state(failing).await, None);
    assert!(rig.manager.is_connected(ADDRESS).await);
    rig.manager.read_rssi(ADDRESS).await.unwrap();
    assert!(matches!(
        rig.next_event().await,
        BleEvent::RssiRead { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn disconnect_all_handles_connecting_and_connected_sessions() {
    let mut rig = Rig::connected().await;
    let pending = "11:22:33:44:55:66";
    rig.platform
        .fail_connect_to(pending, PlatformError::Rejected("busy".into()));
    rig.manager.connect(pending).await.unwrap();
    assert_eq!(
        rig.manager.connection_state(pending).await,
        Some(ConnectionState::Connecting)
    );

    rig.manager.disconnect_all().await.unwrap();
    let events = vec![rig.next_event().await, rig.next_event().await];
    for address in [ADDRESS, pending] {
        assert!(events.contains(&BleEvent::DeviceDisconnected {
            address: address.into()
        }));
    }

    sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.manager.connection_state(ADDRESS).await, None);
    assert_eq!(rig.manager.connection_state(pending).await, None);
    let retries = rig
        .platform
        .count(|c| *c == PlatformCall::Connect(pending.to_string()));
    assert_eq!(retries, 1);
    assert!(rig.events.try_recv().is_err());
}
