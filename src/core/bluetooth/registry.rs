//! Device registry
//! Bidirectional address/name mapping shared by the scan controller, the
//! connection supervisor and the command façade.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use log::debug;

#[derive(Debug, Default)]
struct RegistryMaps {
    /// address -> last known display name
    by_address: HashMap<String, Option<String>>,
    /// upper-cased display name -> address
    by_name: HashMap<String, String>,
}

impl RegistryMaps {
    fn unlink_name_of(&mut self, address: &str) {
        if let Some(Some(name)) = self.by_address.get(address) {
            let key = name.to_uppercase();
            if self.by_name.get(&key).map(String::as_str) == Some(address) {
                self.by_name.remove(&key);
            }
        }
    }
}

/// Single source of truth for address resolution.
///
/// Both directions live behind one lock, so every mutation is applied in
/// one step and readers never see a half-updated mapping.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    maps: RwLock<RegistryMaps>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the name for an address. Any other address holding the same
    /// name (case-insensitive) loses it.
    pub fn record(&self, address: &str, name: Option<&str>) {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);

        maps.unlink_name_of(address);

        if let Some(name) = name {
            let key = name.to_uppercase();
            if let Some(previous) = maps.by_name.insert(key, address.to_string()) {
                if previous != address {
                    debug!("Name {} moved from {} to {}", name, previous, address);
                    maps.by_address.insert(previous, None);
                }
            }
        }

        maps.by_address
            .insert(address.to_string(), name.map(str::to_string));
    }

    /// Returns the argument unchanged when it is a known address, otherwise
    /// looks it up as a display name.
    pub fn resolve(&self, name_or_address: &str) -> Option<String> {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        if maps.by_address.contains_key(name_or_address) {
            return Some(name_or_address.to_string());
        }
        maps.by_name.get(&name_or_address.to_uppercase()).cloned()
    }

    /// Removes both directions of the mapping for an address.
    pub fn forget(&self, address: &str) {
        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);
        maps.unlink_name_of(address);
        maps.by_address.remove(address);
    }

    /// Drops every address `keep` rejects, with its name. Returns how many
    /// were dropped.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);
        let stale: Vec<String> = maps
            .by_address
            .keys()
            .filter(|address| !keep(address))
            .cloned()
            .collect();
        for address in &stale {
            maps.unlink_name_of(address);
            maps.by_address.remove(address);
        }
        stale.len()
    }

    pub fn name_of(&self, address: &str) -> Option<String> {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        maps.by_address.get(address).cloned().flatten()
    }

    pub fn len(&self) -> usize {
        self.maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_address
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
