//! Sensor platform
//!
//! Four read-only sensors per device entry: connection, Wi-Fi signal,
//! installed firmware and firmware update status.

use std::sync::Arc;

use autobayt_api::Device;
use autobayt_host::config_entries::ConfigEntry;
use autobayt_host::device_registry::DeviceInfo;
use autobayt_host::entity::{Attributes, Entity};
use autobayt_host::Hass;
use serde_json::json;

use crate::coordinator::AutobaytCoordinator;
use crate::entity::{stored_device, AutobaytEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Connection,
    SignalStrength,
    Firmware,
    UpdateStatus,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Connection,
        SensorKind::SignalStrength,
        SensorKind::Firmware,
        SensorKind::UpdateStatus,
    ];

    /// Unique id suffix
    pub fn key(&self) -> &'static str {
        match self {
            SensorKind::Connection => "connection",
            SensorKind::SignalStrength => "signal_strength",
            SensorKind::Firmware => "firmware",
            SensorKind::UpdateStatus => "update_status",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SensorKind::Connection => "Connection",
            SensorKind::SignalStrength => "Signal Strength",
            SensorKind::Firmware => "Firmware",
            SensorKind::UpdateStatus => "Update Status",
        }
    }

    pub fn state(&self, device: &Device) -> Option<String> {
        match self {
            SensorKind::Connection => device
                .connection_status
                .map(|online| if online { "connected" } else { "disconnected" }.to_string()),
            SensorKind::SignalStrength => device.sstr.map(|dbm| dbm.to_string()),
            SensorKind::Firmware => device.firmware_version.clone(),
            SensorKind::UpdateStatus => device
                .is_updating
                .map(|updating| if updating { "updating" } else { "idle" }.to_string()),
        }
    }

    pub fn attributes(&self, device: &Device) -> Attributes {
        let mut attributes = Attributes::new();
        match self {
            SensorKind::Connection => {
                attributes.insert("is_hub".into(), json!(device.is_hub));
                attributes.insert("slave_id".into(), json!(device.slave_id));
                attributes.insert("room_name".into(), json!(device.room_name));
            }
            SensorKind::SignalStrength => {}
            SensorKind::Firmware => {
                attributes.insert("model_name".into(), json!(device.model_name));
                if let Some(next) = device.next_firmware() {
                    attributes.insert("next_version".into(), json!(next.version_name));
                    attributes.insert("next_file".into(), json!(next.file_name));
                    attributes.insert("version_code".into(), json!(next.version_code));
                }
            }
            SensorKind::UpdateStatus => {
                attributes.insert("update_percentage".into(), json!(device.perc));
            }
        }
        attributes
    }
}

pub struct AutobaytSensor {
    base: AutobaytEntity,
    kind: SensorKind,
}

impl AutobaytSensor {
    pub fn new(base: AutobaytEntity, kind: SensorKind) -> Self {
        Self { base, kind }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }
}

impl Entity for AutobaytSensor {
    fn domain(&self) -> &'static str {
        "sensor"
    }

    fn unique_id(&self) -> String {
        self.base.unique_id(self.kind.key())
    }

    fn name(&self) -> Option<String> {
        Some(format!("{} {}", self.base.device_name(), self.kind.label()))
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn native_state(&self) -> Option<String> {
        self.kind.state(&self.base.device()?)
    }

    fn extra_attributes(&self) -> Attributes {
        self.kind.attributes(&self.base.device().unwrap_or_default())
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(self.base.device_info())
    }

    fn device_class(&self) -> Option<&str> {
        match self.kind {
            SensorKind::Connection | SensorKind::UpdateStatus => Some("enum"),
            SensorKind::SignalStrength => Some("signal_strength"),
            SensorKind::Firmware => None,
        }
    }

    fn unit_of_measurement(&self) -> Option<&str> {
        (self.kind == SensorKind::SignalStrength).then_some("dBm")
    }

    fn state_class(&self) -> Option<&str> {
        (self.kind == SensorKind::SignalStrength).then_some("measurement")
    }

    fn options(&self) -> Option<Vec<String>> {
        match self.kind {
            SensorKind::Connection => Some(vec!["connected".into(), "disconnected".into()]),
            SensorKind::UpdateStatus => Some(vec!["idle".into(), "updating".into()]),
            _ => None,
        }
    }
}

/// Monitor the entry's device and add its sensors
pub async fn setup_entry(
    hass: &Hass,
    entry: &ConfigEntry,
    coordinator: &Arc<AutobaytCoordinator>,
) {
    let Some((device_id, device)) = stored_device(entry) else {
        return;
    };
    coordinator.add_device(&device_id).await;

    let entities: Vec<Arc<dyn Entity>> = SensorKind::ALL
        .into_iter()
        .map(|kind| {
            let base =
                AutobaytEntity::new(Arc::clone(coordinator), &device_id, device.name.as_deref());
            Arc::new(AutobaytSensor::new(base, kind)) as Arc<dyn Entity>
        })
        .collect();
    hass.add_entities(entry, entities);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        serde_json::from_value(json!({
            "device_id": "A0B1C2D3E4F5",
            "connection_status": false,
            "sstr": "-67",
            "is_hub": false,
            "slave_id": "HUB000000001",
            "firmware_version": "1.0.3",
            "model_name": "SW200LV1",
            "is_updating": true,
            "perc": 45,
            "next_firmware": [{"version_name": "1.0.4", "file_name": "sw200_104.bin", "version_code": 104}]
        }))
        .unwrap()
    }

    #[test]
    fn test_states() {
        let device = device();
        assert_eq!(SensorKind::Connection.state(&device).as_deref(), Some("disconnected"));
        assert_eq!(SensorKind::SignalStrength.state(&device).as_deref(), Some("-67"));
        assert_eq!(SensorKind::Firmware.state(&device).as_deref(), Some("1.0.3"));
        assert_eq!(SensorKind::UpdateStatus.state(&device).as_deref(), Some("updating"));

        let empty = Device::default();
        for kind in SensorKind::ALL {
            assert_eq!(kind.state(&empty), None, "{:?}", kind);
        }
    }

    #[test]
    fn test_attributes() {
        let device = device();

        let connection = SensorKind::Connection.attributes(&device);
        assert_eq!(connection["is_hub"], json!(false));
        assert_eq!(connection["slave_id"], json!("HUB000000001"));
        assert_eq!(connection["room_name"], json!(null));

        let firmware = SensorKind::Firmware.attributes(&device);
        assert_eq!(firmware["model_name"], json!("SW200LV1"));
        assert_eq!(firmware["next_version"], json!("1.0.4"));
        assert_eq!(firmware["next_file"], json!("sw200_104.bin"));
        assert_eq!(firmware["version_code"], json!(104));

        let status = SensorKind::UpdateStatus.attributes(&device);
        assert_eq!(status["update_percentage"], json!(45));

        assert!(SensorKind::SignalStrength.attributes(&device).is_empty());
        assert!(!SensorKind::Firmware
            .attributes(&Device::default())
            .contains_key("next_version"));
    }
}
