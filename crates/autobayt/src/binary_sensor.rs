//! Binary sensor platform
//!
//! The only binary sensor is the diagnostic "firmware update available"
//! flag, added when the entry option `firmware_binary_sensor` is set.

use std::cmp::Ordering;
use std::sync::Arc;

use autobayt_api::Device;
use autobayt_host::config_entries::ConfigEntry;
use autobayt_host::device_registry::DeviceInfo;
use autobayt_host::entity::{Attributes, Entity};
use autobayt_host::entity_registry::EntityCategory;
use autobayt_host::Hass;
use serde_json::json;
use tracing::{debug, warn};

use crate::constants::OPTION_FIRMWARE_BINARY_SENSOR;
use crate::coordinator::AutobaytCoordinator;
use crate::entity::{stored_device, AutobaytEntity};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Number(u64),
    Text(String),
}

/// Dotted version such as `1.0.4` or `v2.1-beta`
#[derive(Debug, Clone)]
pub struct Version(Vec<Segment>);

impl Version {
    /// `None` for an empty version, an empty segment or a stray character
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if trimmed.is_empty() {
            return None;
        }

        trimmed
            .split('.')
            .map(|part| {
                if part.is_empty() {
                    None
                } else if part.chars().all(|c| c.is_ascii_digit()) {
                    part.parse().ok().map(Segment::Number)
                } else if part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+'))
                {
                    Some(Segment::Text(part.to_ascii_lowercase()))
                } else {
                    None
                }
            })
            .collect::<Option<Vec<_>>>()
            .map(Version)
    }
}

impl Ord for Version {
    /// Segment by segment; missing trailing segments count as `0`
    fn cmp(&self, other: &Self) -> Ordering {
        let zero = Segment::Number(0);
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).unwrap_or(&zero);
            let b = other.0.get(i).unwrap_or(&zero);
            let ordering = match (a, b) {
                (Segment::Number(x), Segment::Number(y)) => x.cmp(y),
                (Segment::Number(x), Segment::Text(y)) => x.to_string().cmp(y),
                (Segment::Text(x), Segment::Number(y)) => x.cmp(&y.to_string()),
                (Segment::Text(x), Segment::Text(y)) => x.cmp(y),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Whether the device offers firmware newer than what it runs
pub fn firmware_update_available(device: &Device) -> bool {
    let Some(current) = device.firmware_version.as_deref().filter(|v| !v.is_empty()) else {
        return false;
    };
    let Some(next) = device
        .next_firmware()
        .and_then(|f| f.version_name.as_deref())
        .filter(|v| !v.is_empty())
    else {
        return false;
    };

    match (Version::parse(current), Version::parse(next)) {
        (Some(current), Some(next)) => current < next,
        _ => {
            warn!("Error comparing versions {} and {}", current, next);
            false
        }
    }
}

pub struct FirmwareUpdateSensor {
    base: AutobaytEntity,
}

impl FirmwareUpdateSensor {
    pub fn new(base: AutobaytEntity) -> Self {
        Self { base }
    }
}

impl Entity for FirmwareUpdateSensor {
    fn domain(&self) -> &'static str {
        "binary_sensor"
    }

    fn unique_id(&self) -> String {
        self.base.unique_id("firmware_update_available")
    }

    fn name(&self) -> Option<String> {
        Some(format!("{} Firmware Update", self.base.device_name()))
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn native_state(&self) -> Option<String> {
        let device = self.base.device().unwrap_or_default();
        let on = firmware_update_available(&device);
        Some(if on { "on" } else { "off" }.to_string())
    }

    fn extra_attributes(&self) -> Attributes {
        let device = self.base.device().unwrap_or_default();
        let mut attributes = Attributes::new();
        attributes.insert("current_version".into(), json!(device.firmware_version));
        if let Some(next) = device.next_firmware() {
            attributes.insert("available_version".into(), json!(next.version_name));
            attributes.insert("firmware_file".into(), json!(next.file_name));
            attributes.insert("version_code".into(), json!(next.version_code));
            attributes.insert(
                "requires_app_update".into(),
                json!(next.require_client_update),
            );
        }
        attributes
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(self.base.device_info())
    }

    fn entity_category(&self) -> Option<EntityCategory> {
        Some(EntityCategory::Diagnostic)
    }

    fn device_class(&self) -> Option<&str> {
        Some("update")
    }
}

pub async fn setup_entry(
    hass: &Hass,
    entry: &ConfigEntry,
    coordinator: &Arc<AutobaytCoordinator>,
) {
    if !entry.option_bool(OPTION_FIRMWARE_BINARY_SENSOR, false) {
        debug!("Firmware binary sensor disabled for {}", entry.entry_id);
        return;
    }
    let Some((device_id, device)) = stored_device(entry) else {
        return;
    };

    let base = AutobaytEntity::new(Arc::clone(coordinator), device_id, device.name.as_deref());
    let sensor: Arc<dyn Entity> = Arc::new(FirmwareUpdateSensor::new(base));
    hass.add_entities(entry, vec![sensor]);
}
