//! Inbound commands
//! This module defines every command the host bridge can invoke on the core.
//! Failures are logged and reported to the event sink before being returned.

use log::{error, warn};

use crate::core::bluetooth::{AdapterState, ConnectionState, EventSink, ScanResult};
use crate::core::{BleError, BleEvent};
use crate::state::AppState;

/// Logs a failed command and reports it as an `Error` event.
///
/// `AlreadyInProgress` is only a warning and is not passed back.
fn report(app_state: &AppState, command: &str, result: Result<(), BleError>) -> Result<(), String> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_warning() => {
            warn!("{}: {}", command, e);
            Ok(())
        }
        Err(e) => {
            error!("{} failed: {}", command, e);
            app_state.events.deliver(BleEvent::from(&e));
            Err(e.to_string())
        }
    }
}

/// Maps a device name to its address. Unknown names are passed through so
/// the command fails with `NotConnected` for that argument.
fn resolve(app_state: &AppState, name_or_address: &str) -> String {
    app_state
        .registry
        .resolve(name_or_address)
        .unwrap_or_else(|| name_or_address.to_string())
}

/// Checks the adapter and enables the central role.
///
/// # Arguments
/// * `central_mode` - Enable the central role
/// * `peripheral_mode` - Requested peripheral role; unsupported, only logged
pub async fn initialize(
    app_state: &AppState,
    central_mode: bool,
    peripheral_mode: bool,
) -> Result<(), String> {
    let result = app_state
        .bluetooth_manager
        .initialize(central_mode, peripheral_mode)
        .await;
    report(app_state, "initialize", result)
}

pub async fn deinitialize(app_state: &AppState) -> Result<(), String> {
    let result = app_state.bluetooth_manager.deinitialize().await;
    report(app_state, "deinitialize", result)
}

/// Starts scanning. Devices arrive as `DeviceDiscovered` events.
///
/// # Arguments
/// * `service_uuids` - Service filters, short or full form; empty scans for everything
/// * `clear_cache` - Forget devices reported by earlier scans
pub async fn start_scan(
    app_state: &AppState,
    service_uuids: Vec<String>,
    clear_cache: bool,
) -> Result<(), String> {
    let result = app_state
        .bluetooth_manager
        .start_scan(&service_uuids, clear_cache)
        .await;
    report(app_state, "start_scan", result)
}

pub async fn stop_scan(app_state: &AppState) -> Result<(), String> {
    let result = app_state.bluetooth_manager.stop_scan().await;
    report(app_state, "stop_scan", result)
}

/// Connects to a device by address, retrying failed attempts.
pub async fn connect(app_state: &AppState, address: String) -> Result<(), String> {
    let result = app_state.bluetooth_manager.connect(&address).await;
    report(app_state, "connect", result)
}

pub async fn disconnect(app_state: &AppState, address: String) -> Result<(), String> {
    let result = app_state.bluetooth_manager.disconnect(&address).await;
    report(app_state, "disconnect", result)
}

pub async fn disconnect_all(app_state: &AppState) -> Result<(), String> {
    let result = app_state.bluetooth_manager.disconnect_all().await;
    report(app_state, "disconnect_all", result)
}

/// Enables notifications for a characteristic.
///
/// # Arguments
/// * `name_or_address` - Device address or the name it advertised
/// * `service_uuid` - Service UUID, short or full form
/// * `characteristic_uuid` - Characteristic UUID, short or full form
pub async fn subscribe(
    app_state: &AppState,
    name_or_address: String,
    service_uuid: String,
    characteristic_uuid: String,
) -> Result<(), String> {
    let address = resolve(app_state, &name_or_address);
    let result = app_state
        .bluetooth_manager
        .subscribe(&address, &service_uuid, &characteristic_uuid)
        .await;
    report(app_state, "subscribe", result)
}

pub async fn unsubscribe(
    app_state: &AppState,
    name_or_address: String,
    service_uuid: String,
    characteristic_uuid: String,
) -> Result<(), String> {
    let address = resolve(app_state, &name_or_address);
    let result = app_state
        .bluetooth_manager
        .unsubscribe(&address, &service_uuid, &characteristic_uuid)
        .await;
    report(app_state, "unsubscribe", result)
}

/// Reads a characteristic. The value arrives as a `DataReceived` event.
pub async fn read_characteristic(
    app_state: &AppState,
    name_or_address: String,
    service_uuid: String,
    characteristic_uuid: String,
) -> Result<(), String> {
    let address = resolve(app_state, &name_or_address);
    let result = app_state
        .bluetooth_manager
        .read_characteristic(&address, &service_uuid, &characteristic_uuid)
        .await;
    report(app_state, "read_characteristic", result)
}

pub async fn write_characteristic(
    app_state: &AppState,
    name_or_address: String,
    service_uuid: String,
    characteristic_uuid: String,
    payload: Vec<u8>,
    with_response: bool,
) -> Result<(), String> {
    let address = resolve(app_state, &name_or_address);
    let result = app_state
        .bluetooth_manager
        .write_characteristic(
            &address,
            &service_uuid,
            &characteristic_uuid,
            &payload,
            with_response,
        )
        .await;
    report(app_state, "write_characteristic", result)
}

/// Requests an MTU. The negotiated value arrives as an `MtuChanged` event.
pub async fn request_mtu(app_state: &AppState, name_or_address: String, mtu: i32) -> Result<(), String> {
    let address = resolve(app_state, &name_or_address);
    let result = app_state.bluetooth_manager.request_mtu(&address, mtu).await;
    report(app_state, "request_mtu", result)
}

/// Sets the connection priority and waits for the platform to accept it.
///
/// # Arguments
/// * `priority` - 0 balanced, 1 high, 2 low power; 3 is accepted as high
pub async fn set_connection_priority(
    app_state: &AppState,
    name_or_address: String,
    priority: i32,
) -> Result<(), String> {
    let address = resolve(app_state, &name_or_address);
    let result = app_state
        .bluetooth_manager
        .set_connection_priority(&address, priority)
        .await;
    report(app_state, "set_connection_priority", result)
}

pub async fn read_rssi(app_state: &AppState, name_or_address: String) -> Result<(), String> {
    let address = resolve(app_state, &name_or_address);
    let result = app_state.bluetooth_manager.read_rssi(&address).await;
    report(app_state, "read_rssi", result)
}

pub async fn is_connected(app_state: &AppState, address: String) -> bool {
    app_state.bluetooth_manager.is_connected(&address).await
}

pub async fn is_scanning(app_state: &AppState) -> bool {
    app_state.bluetooth_manager.is_scanning().await
}

pub async fn connection_state(app_state: &AppState, address: String) -> Option<ConnectionState> {
    app_state.bluetooth_manager.connection_state(&address).await
}

pub async fn scan_result(app_state: &AppState, address: String) -> Option<ScanResult> {
    app_state.bluetooth_manager.scan_result(&address).await
}

pub async fn bluetooth_state(app_state: &AppState) -> AdapterState {
    app_state.bluetooth_manager.bluetooth_state().await
}
