//! Update platform: firmware of each device

use std::sync::Arc;

use autobayt_api::Device;
use autobayt_host::config_entries::ConfigEntry;
use autobayt_host::device_registry::DeviceInfo;
use autobayt_host::entity::{Attributes, Entity};
use autobayt_host::Hass;
use serde_json::{json, Value};
use tracing::warn;

use crate::constants::DEFAULT_DEVICE_NAME;
use crate::coordinator::AutobaytCoordinator;
use crate::entity::AutobaytEntity;

/// Update entity feature flag for progress reporting
pub const SUPPORT_PROGRESS: u32 = 4;

pub fn installed_version(device: &Device) -> Option<String> {
    device.firmware_version.clone()
}

/// The candidate version when it differs from the installed one
pub fn latest_version(device: &Device) -> Option<String> {
    let installed = installed_version(device);
    device
        .next_firmware()
        .and_then(|f| f.version_name.clone())
        .filter(|latest| !latest.is_empty() && Some(latest) != installed.as_ref())
        .or(installed)
}

/// `perc` while above zero, otherwise `true` while updating
pub fn in_progress(device: &Device) -> Value {
    if device.is_updating != Some(true) {
        return Value::Bool(false);
    }
    match &device.perc {
        Some(perc) if perc.as_f64().is_some_and(|p| p > 0.0) => Value::Number(perc.clone()),
        _ => Value::Bool(true),
    }
}

pub struct FirmwareUpdate {
    base: AutobaytEntity,
}

impl FirmwareUpdate {
    pub fn new(base: AutobaytEntity) -> Self {
        Self { base }
    }
}

impl Entity for FirmwareUpdate {
    fn domain(&self) -> &'static str {
        "update"
    }

    fn unique_id(&self) -> String {
        self.base.unique_id("firmware_update")
    }

    fn name(&self) -> Option<String> {
        Some("Firmware".to_string())
    }

    fn has_entity_name(&self) -> bool {
        true
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn native_state(&self) -> Option<String> {
        let device = self.base.device()?;
        let installed = installed_version(&device)?;
        let latest = latest_version(&device);
        Some(if latest.as_ref() == Some(&installed) { "off" } else { "on" }.to_string())
    }

    fn extra_attributes(&self) -> Attributes {
        let device = self.base.device().unwrap_or_default();
        let next = device.next_firmware();
        let model = device.model_name.as_deref().unwrap_or(DEFAULT_DEVICE_NAME);

        let mut attributes = Attributes::new();
        attributes.insert("installed_version".into(), json!(installed_version(&device)));
        attributes.insert("latest_version".into(), json!(latest_version(&device)));
        attributes.insert("in_progress".into(), in_progress(&device));
        attributes.insert("title".into(), json!(format!("{} Firmware", model)));
        attributes.insert(
            "release_summary".into(),
            json!(next.map(|f| format!(
                "Firmware update available: {}",
                f.file_name.as_deref().unwrap_or_default()
            ))),
        );
        attributes.insert("supported_features".into(), json!(SUPPORT_PROGRESS));

        if let Some(next) = next {
            attributes.insert("file_name".into(), json!(next.file_name));
            attributes.insert("version_code".into(), json!(next.version_code));
            attributes.insert(
                "requires_client_update".into(),
                json!(next.require_client_update),
            );
        }
        if device.is_updating == Some(true) {
            attributes.insert(
                "update_percentage".into(),
                device.perc.clone().map(Value::Number).unwrap_or(json!(0)),
            );
        }
        attributes
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(self.base.device_info())
    }
}

/// Add an update entity for every named device in the current snapshot
pub async fn setup_entry(
    hass: &Hass,
    entry: &ConfigEntry,
    coordinator: &Arc<AutobaytCoordinator>,
) {
    let Some(data) = coordinator.data() else {
        return;
    };

    let mut entities: Vec<Arc<dyn Entity>> = Vec::new();
    for (device_id, device) in &data.device_data {
        let Some(name) = device.name.as_deref().filter(|n| !n.is_empty()) else {
            warn!("Skipping device with no name: {}", device_id);
            continue;
        };
        let base = AutobaytEntity::new(Arc::clone(coordinator), device_id, Some(name));
        entities.push(Arc::new(FirmwareUpdate::new(base)));
    }
    hass.add_entities(entry, entities);
}
