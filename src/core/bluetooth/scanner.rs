//! Scan controller
//! Drives time-bounded discovery scans, applies service filters and reports
//! each address once per scan session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::{BleEvent, SharedEventSink};
use crate::core::bluetooth::platform::RadioPlatform;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::timer::{TimerEvent, TimerQueue};
use crate::core::bluetooth::types::{AdapterState, Advertisement, ScanResult};
use crate::core::bluetooth::uuid_normalizer;

pub struct ScanController {
    platform: Arc<dyn RadioPlatform>,
    events: SharedEventSink,
    registry: Arc<DeviceRegistry>,
    timers: TimerQueue,
    scan_timeout: Duration,
    /// Dedup set with the last cached strength/payload per address
    discovered: HashMap<String, ScanResult>,
    filters: Vec<Uuid>,
    scanning: bool,
    generation: u64,
    timeout_token: CancellationToken,
}

impl ScanController {
    pub(crate) fn new(
        platform: Arc<dyn RadioPlatform>,
        events: SharedEventSink,
        registry: Arc<DeviceRegistry>,
        timers: TimerQueue,
        scan_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            events,
            registry,
            timers,
            scan_timeout,
            discovered: HashMap::new(),
            filters: Vec::new(),
            scanning: false,
            generation: 0,
            timeout_token: CancellationToken::new(),
        }
    }

    /// Starts a scan session filtered on any of `service_filters`.
    ///
    /// With `clear_cache`, every device reported so far is forgotten except
    /// the addresses in `keep`, which still have a session.
    pub async fn start(
        &mut self,
        service_filters: &[String],
        clear_cache: bool,
        keep: &[String],
    ) -> Result<(), BleError> {
        if !self.platform.has_permissions() {
            error!("Missing required Bluetooth permissions");
            return Err(BleError::PermissionDenied);
        }

        if self.scanning {
            warn!("Scan already in progress");
            return Err(BleError::AlreadyInProgress("Scan".to_string()));
        }

        let adapter_state = self.platform.adapter_state().await;
        if adapter_state != AdapterState::PoweredOn {
            error!("Cannot scan, adapter state is {:?}", adapter_state);
            return Err(BleError::AdapterUnavailable);
        }

        if clear_cache {
            self.discovered.clear();
            let dropped = self
                .registry
                .retain(|address| keep.iter().any(|k| k == address));
            self.platform.forget_devices(keep);
            debug!("Scan cache cleared, {} registry entries dropped", dropped);
        }

        let filters = Self::build_scan_filters(service_filters);
        self.platform.start_scan(&filters).await.map_err(|e| {
            error!("Failed to start scan: {}", e);
            BleError::RequestRejected(format!("Failed to start scan: {e}"))
        })?;

        self.filters = filters;
        self.scanning = true;
        self.generation += 1;
        self.timeout_token = CancellationToken::new();
        self.timers.schedule(
            self.scan_timeout,
            TimerEvent::ScanTimeout {
                generation: self.generation,
            },
            self.timeout_token.clone(),
        );

        info!(
            "BLE scan started with {} service filter(s)",
            self.filters.len()
        );
        Ok(())
    }

    /// Stops the current scan. Stopping an idle controller is a no-op.
    pub async fn stop(&mut self) {
        if !self.scanning {
            return;
        }

        self.timeout_token.cancel();
        if let Err(e) = self.platform.stop_scan().await {
            error!("Error stopping scan: {}", e);
        }
        self.scanning = false;
        info!("BLE scan stopped");
    }

    pub(crate) async fn on_timeout(&mut self, generation: u64) {
        if self.scanning && generation == self.generation {
            info!("Scan timeout reached");
            self.stop().await;
        }
    }

    /// Handles one raw advertisement from the platform.
    pub fn on_advertisement(&mut self, advertisement: Advertisement) {
        if !self.scanning {
            debug!("Ignoring advertisement from {} outside a scan", advertisement.address);
            return;
        }

        if !self.matches_filters(&advertisement) {
            return;
        }

        if let Some(cached) = self.discovered.get_mut(&advertisement.address) {
            cached.refresh(&advertisement);
            return;
        }

        let result = ScanResult::from_advertisement(&advertisement);
        let name = result
            .display_name
            .clone()
            .or_else(|| self.registry.name_of(&result.address));
        self.registry.record(&result.address, name.as_deref());
        debug!(
            "Device discovered: {} ({:?}) RSSI: {}",
            result.address, result.display_name, result.signal_strength
        );
        self.events.deliver(BleEvent::DeviceDiscovered {
            address: result.address.clone(),
            name: result.display_name.clone(),
            signal_strength: result.signal_strength,
            advertising_payload: result.advertising_payload.clone(),
        });
        self.discovered.insert(result.address.clone(), result);
    }

    /// The radio aborted the scan. Not retried here.
    pub fn on_scan_failed(&mut self, code: i32) {
        self.timeout_token.cancel();
        self.scanning = false;
        error!("Scan failed with error code: {}", code);
        self.events
            .deliver(BleEvent::error(format!("Scan failed with error code: {code}")));
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn cached(&self, address: &str) -> Option<&ScanResult> {
        self.discovered.get(address)
    }

    fn matches_filters(&self, advertisement: &Advertisement) -> bool {
        self.filters.is_empty()
            || advertisement
                .service_uuids
                .iter()
                .any(|uuid| self.filters.contains(uuid))
    }

    fn build_scan_filters(service_filters: &[String]) -> Vec<Uuid> {
        let mut filters = Vec::with_capacity(service_filters.len());
        for filter in service_filters {
            match uuid_normalizer::parse(filter) {
                Ok(uuid) if !filters.contains(&uuid) => filters.push(uuid),
                Ok(_) => {}
                Err(e) => error!("Invalid UUID {}: {}", filter, e),
            }
        }
        filters
    }
}
