//! Entity model
//!
//! Integrations describe what they expose through [`Entity`]; the host turns
//! that into registry entries and state machine writes.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::device_registry::DeviceInfo;
use crate::entity_registry::EntityCategory;
use crate::state::{STATE_UNAVAILABLE, STATE_UNKNOWN};

pub type Attributes = HashMap<String, serde_json::Value>;

/// Something the host can render into a state
pub trait Entity: Send + Sync {
    /// Entity domain (`sensor`, `switch`, `binary_sensor`, `update`)
    fn domain(&self) -> &'static str;

    /// Stable id within the integration
    fn unique_id(&self) -> String;

    fn name(&self) -> Option<String>;

    /// `name` is relative to the device name
    fn has_entity_name(&self) -> bool {
        false
    }

    fn available(&self) -> bool {
        true
    }

    /// Current value, `None` when unknown
    fn native_state(&self) -> Option<String>;

    /// Attributes written only while available
    fn extra_attributes(&self) -> Attributes {
        Attributes::new()
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        None
    }

    fn entity_category(&self) -> Option<EntityCategory> {
        None
    }

    fn device_class(&self) -> Option<&str> {
        None
    }

    fn unit_of_measurement(&self) -> Option<&str> {
        None
    }

    fn state_class(&self) -> Option<&str> {
        None
    }

    /// Allowed values of an enum sensor
    fn options(&self) -> Option<Vec<String>> {
        None
    }

    fn as_switch(&self) -> Option<&dyn SwitchControl> {
        None
    }
}

/// Control surface of a switch entity
#[async_trait]
pub trait SwitchControl: Send + Sync {
    fn is_on(&self) -> Option<bool>;

    async fn turn_on(&self);

    async fn turn_off(&self);
}

/// Display name, prefixed with the device name for `has_entity_name` entities
pub fn friendly_name(entity: &dyn Entity) -> Option<String> {
    if !entity.has_entity_name() {
        return entity.name();
    }
    let device_name = entity.device_info().and_then(|info| info.name);
    match (device_name, entity.name()) {
        (Some(device), Some(name)) => Some(format!("{} {}", device, name)),
        (Some(device), None) => Some(device),
        (None, name) => name,
    }
}

/// State value and attributes to write for an entity
pub fn render_state(entity: &dyn Entity) -> (String, Attributes) {
    let available = entity.available();

    let state = if !available {
        STATE_UNAVAILABLE.to_string()
    } else {
        entity
            .native_state()
            .unwrap_or_else(|| STATE_UNKNOWN.to_string())
    };

    let mut attributes = if available {
        entity.extra_attributes()
    } else {
        Attributes::new()
    };

    if let Some(options) = entity.options() {
        attributes.insert("options".into(), serde_json::json!(options));
    }
    if let Some(state_class) = entity.state_class() {
        attributes.insert("state_class".into(), state_class.into());
    }
    if let Some(device_class) = entity.device_class() {
        attributes.insert("device_class".into(), device_class.into());
    }
    if let Some(unit) = entity.unit_of_measurement() {
        attributes.insert("unit_of_measurement".into(), unit.into());
    }
    if let Some(name) = friendly_name(entity) {
        attributes.insert("friendly_name".into(), name.into());
    }

    (state, attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Probe {
        available: bool,
        value: Option<&'static str>,
        has_entity_name: bool,
    }

    impl Entity for Probe {
        fn domain(&self) -> &'static str {
            "sensor"
        }

        fn unique_id(&self) -> String {
            "probe".into()
        }

        fn name(&self) -> Option<String> {
            Some("Firmware".into())
        }

        fn has_entity_name(&self) -> bool {
            self.has_entity_name
        }

        fn available(&self) -> bool {
            self.available
        }

        fn native_state(&self) -> Option<String> {
            self.value.map(String::from)
        }

        fn extra_attributes(&self) -> Attributes {
            Attributes::from([("model_name".to_string(), json!("SW200LV1"))])
        }

        fn device_info(&self) -> Option<DeviceInfo> {
            Some(DeviceInfo {
                name: Some("Kitchen".into()),
                ..Default::default()
            })
        }

        fn unit_of_measurement(&self) -> Option<&str> {
            Some("dBm")
        }
    }

    #[test]
    fn test_render_available() {
        let probe = Probe {
            available: true,
            value: Some("1.0.3"),
            has_entity_name: false,
        };
        let (state, attrs) = render_state(&probe);
        assert_eq!(state, "1.0.3");
        assert_eq!(attrs["model_name"], json!("SW200LV1"));
        assert_eq!(attrs["unit_of_measurement"], json!("dBm"));
        assert_eq!(attrs["friendly_name"], json!("Firmware"));
    }

    #[test]
    fn test_render_unknown_and_unavailable() {
        let unknown = Probe {
            available: true,
            value: None,
            has_entity_name: false,
        };
        assert_eq!(render_state(&unknown).0, STATE_UNKNOWN);

        let unavailable = Probe {
            available: false,
            value: Some("1.0.3"),
            has_entity_name: false,
        };
        let (state, attrs) = render_state(&unavailable);
        assert_eq!(state, STATE_UNAVAILABLE);
        assert!(!attrs.contains_key("model_name"));
        assert!(attrs.contains_key("friendly_name"));
    }

    #[test]
    fn test_friendly_name_with_device() {
        let probe = Probe {
            available: true,
            value: None,
            has_entity_name: true,
        };
        assert_eq!(friendly_name(&probe).as_deref(), Some("Kitchen Firmware"));
    }
}
