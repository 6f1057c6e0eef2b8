//! Shared base of Autobayt entities

use std::sync::Arc;

use autobayt_api::Device;
use autobayt_host::config_entries::ConfigEntry;
use autobayt_host::device_registry::{
    DeviceConnection, DeviceIdentifier, DeviceInfo, CONNECTION_NETWORK_MAC,
};

use crate::constants::{
    CONF_DEVICE_DATA, CONF_DEVICE_ID, DEFAULT_DEVICE_NAME, DOMAIN, MANUFACTURER,
};
use crate::coordinator::AutobaytCoordinator;

/// Coordinator handle and device identity every entity carries
#[derive(Clone)]
pub struct AutobaytEntity {
    coordinator: Arc<AutobaytCoordinator>,
    device_id: String,
    device_name: String,
}

impl AutobaytEntity {
    pub fn new(
        coordinator: Arc<AutobaytCoordinator>,
        device_id: impl Into<String>,
        device_name: Option<&str>,
    ) -> Self {
        Self {
            coordinator,
            device_id: device_id.into(),
            device_name: device_name
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_DEVICE_NAME)
                .to_string(),
        }
    }

    pub fn coordinator(&self) -> &Arc<AutobaytCoordinator> {
        &self.coordinator
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn unique_id(&self, suffix: &str) -> String {
        format!("{}_{}", self.device_id, suffix)
    }

    /// Current snapshot of this entity's device
    pub fn device(&self) -> Option<Device> {
        self.coordinator.device(&self.device_id)
    }

    /// The last refresh succeeded and returned this device
    pub fn available(&self) -> bool {
        self.coordinator.last_update_success()
            && self
                .coordinator
                .data()
                .is_some_and(|data| data.device_data.contains_key(&self.device_id))
    }

    pub fn device_info(&self) -> DeviceInfo {
        let device = self.device().unwrap_or_default();
        device_info(&self.device_id, &self.device_name, &device)
    }
}

/// Device id and the device data stored on a device entry
///
/// Data that does not decode reads as an empty device.
pub fn stored_device(entry: &ConfigEntry) -> Option<(String, Device)> {
    let device_id = entry.data_str(CONF_DEVICE_ID).filter(|id| !id.is_empty())?;
    let device = entry
        .data
        .get(CONF_DEVICE_DATA)
        .and_then(|data| serde_json::from_value(data.clone()).ok())
        .unwrap_or_default();
    Some((device_id.to_string(), device))
}

/// Device registry description of an Autobayt device
pub fn device_info(device_id: &str, name: &str, device: &Device) -> DeviceInfo {
    let via_device = match device.slave_id.as_deref() {
        Some(hub) if device.is_hub != Some(true) && !hub.is_empty() => {
            Some(DeviceIdentifier::new(DOMAIN, hub))
        }
        _ => None,
    };

    DeviceInfo {
        identifiers: vec![DeviceIdentifier::new(DOMAIN, device_id)],
        connections: vec![DeviceConnection::new(CONNECTION_NETWORK_MAC, device_id)],
        manufacturer: Some(MANUFACTURER.to_string()),
        name: Some(name.to_string()),
        model: Some(device.model_name.clone().unwrap_or_else(|| "Unknown".into())),
        sw_version: Some(
            device
                .firmware_version
                .clone()
                .unwrap_or_else(|| "Unknown".into()),
        ),
        via_device,
    }
}
