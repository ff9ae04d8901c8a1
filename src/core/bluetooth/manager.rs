//! Bluetooth manager for the BLE central bridge
//! This module provides the main interface for bluetooth operations. Every
//! command is queued onto one task that owns the scan controller, the
//! connection supervisor and the GATT dispatcher, so no two commands ever
//! interleave.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::config::central_config::CentralConfig;
use crate::core::bluetooth::connection::{ConnectionSupervisor, SupervisorSettings};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::{BleEvent, RadioEvent, RadioEventReceiver, SharedEventSink};
use crate::core::bluetooth::gatt::GattDispatcher;
use crate::core::bluetooth::platform::RadioPlatform;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::scanner::ScanController;
use crate::core::bluetooth::timer::{TimerEvent, TimerQueue};
use crate::core::bluetooth::types::{AdapterState, ConnectionPriority, ConnectionState, ScanResult};

type Reply<T> = oneshot::Sender<Result<T, BleError>>;

/// Target of a GATT command
#[derive(Debug)]
struct GattRequest {
    address: String,
    service: String,
    characteristic: String,
}

#[derive(Debug)]
enum Command {
    Initialize {
        central_mode: bool,
        peripheral_mode: bool,
        reply: Reply<()>,
    },
    Deinitialize {
        reply: Reply<()>,
    },
    StartScan {
        service_filters: Vec<String>,
        clear_cache: bool,
        reply: Reply<()>,
    },
    StopScan {
        reply: Reply<()>,
    },
    Connect {
        address: String,
        reply: Reply<()>,
    },
    Disconnect {
        address: String,
        reply: Reply<()>,
    },
    DisconnectAll {
        reply: Reply<()>,
    },
    Subscribe {
        request: GattRequest,
        reply: Reply<()>,
    },
    Unsubscribe {
        request: GattRequest,
        reply: Reply<()>,
    },
    Read {
        request: GattRequest,
        reply: Reply<()>,
    },
    Write {
        request: GattRequest,
        value: Vec<u8>,
        with_response: bool,
        reply: Reply<()>,
    },
    RequestMtu {
        address: String,
        mtu: u16,
        reply: Reply<()>,
    },
    ReadRssi {
        address: String,
        reply: Reply<()>,
    },
    SetConnectionPriority {
        address: String,
        priority: ConnectionPriority,
        reply: Reply<()>,
    },
    IsConnected {
        address: String,
        reply: oneshot::Sender<bool>,
    },
    IsScanning {
        reply: oneshot::Sender<bool>,
    },
    ConnectionState {
        address: String,
        reply: oneshot::Sender<Option<ConnectionState>>,
    },
    ScanResult {
        address: String,
        reply: oneshot::Sender<Option<ScanResult>>,
    },
    BluetoothState {
        reply: oneshot::Sender<AdapterState>,
    },
}

/// Handle to the serialized command context.
///
/// Cheap to clone; every clone talks to the same context. Commands return
/// once they are validated and issued, results of the radio operations
/// arrive later as `BleEvent`s.
#[derive(Clone)]
pub struct BluetoothManager {
    inbox: mpsc::Sender<Command>,
    priority_timeout: Duration,
}

impl BluetoothManager {
    /// Starts the command context on the current runtime.
    ///
    /// `radio` must be the receiving half of the channel `platform` reports on.
    pub fn spawn(
        platform: Arc<dyn RadioPlatform>,
        radio: RadioEventReceiver,
        events: SharedEventSink,
        registry: Arc<DeviceRegistry>,
        config: &CentralConfig,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let (timers, timer_rx) = TimerQueue::new();

        let scanner = ScanController::new(
            platform.clone(),
            events.clone(),
            registry.clone(),
            timers.clone(),
            config.scan_timeout(),
        );
        let supervisor = ConnectionSupervisor::new(
            platform.clone(),
            events.clone(),
            registry,
            timers,
            SupervisorSettings {
                max_retries: config.max_connect_retries.max(1),
                retry_delay: config.retry_delay(),
                settle_delay: config.settle_delay(),
                default_mtu: config.default_mtu,
            },
        );
        let dispatcher = GattDispatcher::new(
            platform.clone(),
            events.clone(),
            config.max_mtu,
            config.default_mtu,
        );

        let context = CommandContext {
            platform,
            events,
            scanner,
            supervisor,
            dispatcher,
            initialized: false,
        };
        tokio::spawn(context.run(inbox_rx, radio, timer_rx));

        Self {
            inbox: inbox_tx,
            priority_timeout: config.priority_timeout(),
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BleError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(build(tx))
            .await
            .map_err(|_| BleError::ManagerShutdown)?;
        rx.await.map_err(|_| BleError::ManagerShutdown)
    }

    /// Checks the adapter and enables the central role.
    pub async fn initialize(&self, central_mode: bool, peripheral_mode: bool) -> Result<(), BleError> {
        self.request(|reply| Command::Initialize {
            central_mode,
            peripheral_mode,
            reply,
        })
        .await?
    }

    /// Stops scanning, disconnects every session and returns to uninitialized.
    pub async fn deinitialize(&self) -> Result<(), BleError> {
        self.request(|reply| Command::Deinitialize { reply }).await?
    }

    pub async fn start_scan(&self, service_filters: &[String], clear_cache: bool) -> Result<(), BleError> {
        self.request(|reply| Command::StartScan {
            service_filters: service_filters.to_vec(),
            clear_cache,
            reply,
        })
        .await?
    }

    pub async fn stop_scan(&self) -> Result<(), BleError> {
        self.request(|reply| Command::StopScan { reply }).await?
    }

    pub async fn connect(&self, address: &str) -> Result<(), BleError> {
        self.request(|reply| Command::Connect {
            address: address.to_string(),
            reply,
        })
        .await?
    }

    pub async fn disconnect(&self, address: &str) -> Result<(), BleError> {
        self.request(|reply| Command::Disconnect {
            address: address.to_string(),
            reply,
        })
        .await?
    }

    pub async fn disconnect_all(&self) -> Result<(), BleError> {
        self.request(|reply| Command::DisconnectAll { reply }).await?
    }

    pub async fn subscribe(&self, address: &str, service: &str, characteristic: &str) -> Result<(), BleError> {
        let request = GattRequest::new(address, service, characteristic);
        self.request(|reply| Command::Subscribe { request, reply }).await?
    }

    pub async fn unsubscribe(&self, address: &str, service: &str, characteristic: &str) -> Result<(), BleError> {
        let request = GattRequest::new(address, service, characteristic);
        self.request(|reply| Command::Unsubscribe { request, reply }).await?
    }

    pub async fn read_characteristic(
        &self,
        address: &str,
        service: &str,
        characteristic: &str,
    ) -> Result<(), BleError> {
        let request = GattRequest::new(address, service, characteristic);
        self.request(|reply| Command::Read { request, reply }).await?
    }

    pub async fn write_characteristic(
        &self,
        address: &str,
        service: &str,
        characteristic: &str,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), BleError> {
        let request = GattRequest::new(address, service, characteristic);
        self.request(|reply| Command::Write {
            request,
            value: value.to_vec(),
            with_response,
            reply,
        })
        .await?
    }

    /// Requests an MTU. Values above `u16::MAX` are clamped with the rest.
    pub async fn request_mtu(&self, address: &str, mtu: i32) -> Result<(), BleError> {
        if mtu <= 0 {
            return Err(BleError::InvalidArgument(format!("mtu {mtu}")));
        }
        let mtu = u16::try_from(mtu).unwrap_or(u16::MAX);
        self.request(|reply| Command::RequestMtu {
            address: address.to_string(),
            mtu,
            reply,
        })
        .await?
    }

    pub async fn read_rssi(&self, address: &str) -> Result<(), BleError> {
        self.request(|reply| Command::ReadRssi {
            address: address.to_string(),
            reply,
        })
        .await?
    }

    /// Applies a connection priority given in either numeric scheme and
    /// waits for the outcome, at most for the configured bound.
    pub async fn set_connection_priority(&self, address: &str, priority: i32) -> Result<(), BleError> {
        let priority = ConnectionPriority::from_raw(priority)?;
        let outcome = timeout(
            self.priority_timeout,
            self.request(|reply| Command::SetConnectionPriority {
                address: address.to_string(),
                priority,
                reply,
            }),
        )
        .await
        .map_err(|_| {
            warn!(
                "Connection priority request for {} timed out after {} ms",
                address,
                self.priority_timeout.as_millis()
            );
            BleError::Timeout(format!("connection priority for {address}"))
        })?;
        outcome?
    }

    pub async fn is_connected(&self, address: &str) -> bool {
        self.request(|reply| Command::IsConnected {
            address: address.to_string(),
            reply,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn is_scanning(&self) -> bool {
        self.request(|reply| Command::IsScanning { reply })
            .await
            .unwrap_or(false)
    }

    /// Supervisor state for `address`, `None` when there is no session.
    pub async fn connection_state(&self, address: &str) -> Option<ConnectionState> {
        self.request(|reply| Command::ConnectionState {
            address: address.to_string(),
            reply,
        })
        .await
        .ok()
        .flatten()
    }

    /// Cached scan result for `address` from the current dedup set.
    pub async fn scan_result(&self, address: &str) -> Option<ScanResult> {
        self.request(|reply| Command::ScanResult {
            address: address.to_string(),
            reply,
        })
        .await
        .ok()
        .flatten()
    }

    pub async fn bluetooth_state(&self) -> AdapterState {
        self.request(|reply| Command::BluetoothState { reply })
            .await
            .unwrap_or(AdapterState::Unknown)
    }
}

impl GattRequest {
    fn new(address: &str, service: &str, characteristic: &str) -> Self {
        Self {
            address: address.to_string(),
            service: service.to_string(),
            characteristic: characteristic.to_string(),
        }
    }
}

/// State owned by the command task
struct CommandContext {
    platform: Arc<dyn RadioPlatform>,
    events: SharedEventSink,
    scanner: ScanController,
    supervisor: ConnectionSupervisor,
    dispatcher: GattDispatcher,
    initialized: bool,
}

impl CommandContext {
    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Command>,
        mut radio: RadioEventReceiver,
        mut timers: mpsc::UnboundedReceiver<TimerEvent>,
    ) {
        info!("BLE command context started");
        loop {
            tokio::select! {
                command = inbox.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = radio.recv() => self.handle_radio_event(event).await,
                Some(timer) = timers.recv() => self.handle_timer(timer).await,
            }
        }

        info!("All manager handles dropped, shutting down BLE command context");
        self.scanner.stop().await;
        self.supervisor.disconnect_all().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initialize {
                central_mode,
                peripheral_mode,
                reply,
            } => {
                let _ = reply.send(self.initialize(central_mode, peripheral_mode).await);
            }
            Command::Deinitialize { reply } => {
                self.deinitialize().await;
                let _ = reply.send(Ok(()));
            }
            Command::StartScan {
                service_filters,
                clear_cache,
                reply,
            } => {
                let result = match self.ensure_initialized() {
                    Ok(()) => {
                        let sessions = self.supervisor.addresses();
                        self.scanner
                            .start(&service_filters, clear_cache, &sessions)
                            .await
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::StopScan { reply } => {
                self.scanner.stop().await;
                let _ = reply.send(Ok(()));
            }
            Command::Connect { address, reply } => {
                let result = match self.ensure_initialized() {
                    Ok(()) => self.supervisor.connect(&address).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Disconnect { address, reply } => {
                let result = match self.ensure_initialized() {
                    Ok(()) => self.supervisor.disconnect(&address).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::DisconnectAll { reply } => {
                let result = match self.ensure_initialized() {
                    Ok(()) => {
                        self.supervisor.disconnect_all().await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Subscribe { request, reply } => {
                let _ = reply.send(self.subscribe(&request, true).await);
            }
            Command::Unsubscribe { request, reply } => {
                let _ = reply.send(self.subscribe(&request, false).await);
            }
            Command::Read { request, reply } => {
                let _ = reply.send(self.read(&request).await);
            }
            Command::Write {
                request,
                value,
                with_response,
                reply,
            } => {
                let _ = reply.send(self.write(&request, &value, with_response).await);
            }
            Command::RequestMtu { address, mtu, reply } => {
                let _ = reply.send(self.request_mtu(&address, mtu).await);
            }
            Command::ReadRssi { address, reply } => {
                let _ = reply.send(self.read_rssi(&address).await);
            }
            Command::SetConnectionPriority {
                address,
                priority,
                reply,
            } => {
                let result = match self.ensure_initialized() {
                    Ok(()) => self.supervisor.set_connection_priority(&address, priority).await,
                    Err(e) => Err(e),
                };
                if reply.send(result).is_err() {
                    debug!("Connection priority result for {} arrived after the caller gave up", address);
                }
            }
            Command::IsConnected { address, reply } => {
                let _ = reply.send(self.supervisor.is_connected(&address));
            }
            Command::IsScanning { reply } => {
                let _ = reply.send(self.scanner.is_scanning());
            }
            Command::ConnectionState { address, reply } => {
                let _ = reply.send(self.supervisor.state(&address));
            }
            Command::ScanResult { address, reply } => {
                let _ = reply.send(self.scanner.cached(&address).cloned());
            }
            Command::BluetoothState { reply } => {
                let _ = reply.send(self.platform.adapter_state().await);
            }
        }
    }

    fn ensure_initialized(&self) -> Result<(), BleError> {
        if self.initialized {
            Ok(())
        } else {
            Err(BleError::NotInitialized)
        }
    }

    async fn initialize(&mut self, central_mode: bool, peripheral_mode: bool) -> Result<(), BleError> {
        if self.initialized {
            warn!("BLE central already initialized");
            return Ok(());
        }

        let adapter_state = self.platform.adapter_state().await;
        if adapter_state != AdapterState::PoweredOn {
            error!("Bluetooth adapter is {:?}, cannot initialize", adapter_state);
            return Err(BleError::AdapterUnavailable);
        }
        if peripheral_mode {
            warn!("Peripheral role is not supported, continuing with the central role only");
        }

        self.initialized = true;
        info!(
            "BLE central initialized (Central: {}, Peripheral: {})",
            central_mode, peripheral_mode
        );
        self.events.deliver(BleEvent::Initialized);
        Ok(())
    }

    async fn deinitialize(&mut self) {
        if !self.initialized {
            return;
        }
        self.scanner.stop().await;
        self.supervisor.disconnect_all().await;
        self.initialized = false;
        info!("BLE central deinitialized");
    }

    async fn subscribe(&self, request: &GattRequest, enable: bool) -> Result<(), BleError> {
        self.ensure_initialized()?;
        let session = self.supervisor.connected(&request.address)?;
        if enable {
            self.dispatcher
                .subscribe(session, &request.service, &request.characteristic)
                .await
        } else {
            self.dispatcher
                .unsubscribe(session, &request.service, &request.characteristic)
                .await
        }
    }

    async fn read(&self, request: &GattRequest) -> Result<(), BleError> {
        self.ensure_initialized()?;
        let session = self.supervisor.connected(&request.address)?;
        self.dispatcher
            .read(session, &request.service, &request.characteristic)
            .await
    }

    async fn write(&self, request: &GattRequest, value: &[u8], with_response: bool) -> Result<(), BleError> {
        self.ensure_initialized()?;
        let session = self.supervisor.connected(&request.address)?;
        self.dispatcher
            .write(session, &request.service, &request.characteristic, value, with_response)
            .await
    }

    async fn request_mtu(&self, address: &str, mtu: u16) -> Result<(), BleError> {
        self.ensure_initialized()?;
        let session = self.supervisor.connected(address)?;
        self.dispatcher.request_mtu(session, mtu).await
    }

    async fn read_rssi(&self, address: &str) -> Result<(), BleError> {
        self.ensure_initialized()?;
        let session = self.supervisor.connected(address)?;
        self.dispatcher.read_rssi(session).await
    }

    async fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Advertisement(advertisement) => self.scanner.on_advertisement(advertisement),
            RadioEvent::ScanFailed { code } => self.scanner.on_scan_failed(code),
            RadioEvent::ConnectionStateChanged {
                address,
                state,
                name,
            } => self.supervisor.on_link_state(&address, state, name).await,
            RadioEvent::ConnectionFailed { address, reason } => {
                self.supervisor.on_connection_failed(&address, &reason).await
            }
            RadioEvent::ServicesDiscovered {
                address,
                status,
                services,
            } => self.supervisor.on_services_discovered(&address, status, services),
            completion => {
                let Some(address) = completion.address().map(str::to_string) else {
                    return;
                };
                match self.supervisor.connected_mut(&address) {
                    Ok(session) => self.dispatcher.on_completion(session, completion),
                    Err(_) => debug!("Completion for {} dropped, not connected", address),
                }
            }
        }
    }

    async fn handle_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::RetryConnect { address, session } => {
                self.supervisor.on_retry_timer(&address, session).await
            }
            TimerEvent::DiscoverServices { address, session } => {
                self.supervisor.on_discovery_timer(&address, session).await
            }
            TimerEvent::ScanTimeout { generation } => self.scanner.on_timeout(generation).await,
        }
    }
}
