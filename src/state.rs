//! Application state management
//! This module defines the one explicitly owned instance of the BLE core.

use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::config::AppConfig;
use crate::core::bluetooth::{radio_channel, BluestPlatform, RadioEventReceiver, SharedEventSink};
use crate::core::{BluetoothManager, DeviceRegistry, RadioPlatform};

/// Global application state
pub struct AppState {
    /// Handle to the serialized command context
    pub bluetooth_manager: BluetoothManager,
    /// Name/address registry, shared with the command context
    pub registry: Arc<DeviceRegistry>,
    /// Where command errors are reported
    pub events: SharedEventSink,
}

impl AppState {
    /// Creates the state on top of the system Bluetooth adapter.
    pub async fn new(config: &AppConfig, events: SharedEventSink) -> Result<Self> {
        info!("Initializing BluetoothManager...");
        let (radio_tx, radio_rx) = radio_channel();
        let platform = BluestPlatform::new(radio_tx).await?;
        Ok(Self::with_platform(Arc::new(platform), radio_rx, events, config))
    }

    /// Creates the state on top of any radio platform.
    ///
    /// `radio` must receive the completions `platform` reports.
    pub fn with_platform(
        platform: Arc<dyn RadioPlatform>,
        radio: RadioEventReceiver,
        events: SharedEventSink,
        config: &AppConfig,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let bluetooth_manager = BluetoothManager::spawn(
            platform,
            radio,
            events.clone(),
            registry.clone(),
            &config.central,
        );
        Self {
            bluetooth_manager,
            registry,
            events,
        }
    }

    /// Gets a handle to the Bluetooth manager
    pub fn get_bluetooth_manager(&self) -> BluetoothManager {
        self.bluetooth_manager.clone()
    }
}
