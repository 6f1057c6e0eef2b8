//! Device registry bookkeeping for Autobayt devices

use std::sync::Arc;

use autobayt_api::Device;
use autobayt_host::device_registry::{
    DeviceConnection, DeviceEntry, DeviceIdentifier, DeviceInfo, DeviceUpdate,
    CONNECTION_NETWORK_MAC,
};
use autobayt_host::Hass;
use tracing::debug;

use crate::constants::{DOMAIN, MANUFACTURER};
use crate::coordinator::CoordinatorData;

pub struct DeviceManager<'a> {
    hass: &'a Hass,
}

impl<'a> DeviceManager<'a> {
    pub fn new(hass: &'a Hass) -> Self {
        Self { hass }
    }

    /// Get or create the registry device for `device_id`
    pub fn register_device(
        &self,
        config_entry_id: &str,
        device_id: &str,
        device: &Device,
    ) -> Arc<DeviceEntry> {
        let name = device.name.clone().unwrap_or_else(|| {
            format!("Autobayt {}", device.model_name.as_deref().unwrap_or("Device"))
        });
        let model = device.model_name.clone().unwrap_or_else(|| "Unknown".into());

        let info = DeviceInfo {
            identifiers: vec![DeviceIdentifier::new(DOMAIN, device_id)],
            connections: vec![DeviceConnection::new(CONNECTION_NETWORK_MAC, device_id)],
            manufacturer: Some(MANUFACTURER.to_string()),
            name: Some(name.clone()),
            model: Some(model.clone()),
            sw_version: Some(
                device
                    .firmware_version
                    .clone()
                    .unwrap_or_else(|| "Unknown".into()),
            ),
            via_device: None,
        };
        let entry = self.hass.device_registry.get_or_create(config_entry_id, &info);
        debug!("Registered device {} ({}) with MAC {}", name, model, device_id);
        entry
    }

    /// Push a changed name or firmware version to the registry
    ///
    /// Returns whether the registry entry was changed.
    pub fn update_device(&self, device_id: &str, device: &Device) -> bool {
        let Some(existing) = self
            .hass
            .device_registry
            .get_by_identifier(DOMAIN, device_id)
            .or_else(|| self.device_by_mac(device_id))
        else {
            return false;
        };

        let mut update = DeviceUpdate::default();
        if let Some(version) = device.firmware_version.as_deref().filter(|v| !v.is_empty()) {
            if existing.sw_version.as_deref() != Some(version) {
                update.sw_version = Some(version.to_string());
            }
        }
        if let Some(name) = device.name.as_deref().filter(|n| !n.is_empty()) {
            if existing.name.as_deref() != Some(name) {
                update.name = Some(name.to_string());
            }
        }
        if update.sw_version.is_none() && update.name.is_none() {
            return false;
        }

        debug!("Updating device {} with {:?}", device_id, update);
        self.hass.device_registry.update(&existing.id, update).is_some()
    }

    /// Apply every device of a snapshot
    pub fn sync(&self, data: &CoordinatorData) {
        for (device_id, device) in &data.device_data {
            self.update_device(device_id, device);
        }
    }

    pub fn device_by_mac(&self, mac: &str) -> Option<Arc<DeviceEntry>> {
        self.hass
            .device_registry
            .get_by_connection(CONNECTION_NETWORK_MAC, mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_defaults_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let hass = Hass::new(dir.path());
        let manager = DeviceManager::new(&hass);

        let device = Device {
            model_name: Some("SW200LV1".into()),
            ..Default::default()
        };
        let entry = manager.register_device("entry1", "a0b1c2d3e4f5", &device);
        assert_eq!(entry.name.as_deref(), Some("Autobayt SW200LV1"));
        assert_eq!(entry.sw_version.as_deref(), Some("Unknown"));
        assert_eq!(entry.config_entries, vec!["entry1".to_string()]);

        let refreshed = Device {
            name: Some("Kitchen".into()),
            firmware_version: Some("1.0.4".into()),
            ..device.clone()
        };
        assert!(manager.update_device("a0b1c2d3e4f5", &refreshed));
        assert!(!manager.update_device("a0b1c2d3e4f5", &refreshed));

        let by_mac = manager.device_by_mac("A0:B1:C2:D3:E4:F5").unwrap();
        assert_eq!(by_mac.id, entry.id);
        assert_eq!(by_mac.name.as_deref(), Some("Kitchen"));
        assert_eq!(by_mac.sw_version.as_deref(), Some("1.0.4"));
    }

    #[test]
    fn test_update_unknown_device() {
        let dir = tempfile::tempdir().unwrap();
        let hass = Hass::new(dir.path());
        let device = Device {
            name: Some("Kitchen".into()),
            ..Default::default()
        };
        assert!(!DeviceManager::new(&hass).update_device("missing", &device));
    }
}
