//! JSON models returned by the Autobayt API
//!
//! The API is loosely typed. Every known field is optional and a value of the
//! wrong JSON type reads as absent instead of failing the whole device. Keys
//! we do not model are kept in `extra` and written back unchanged.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Deserialize `T`, or `None` when the value has another shape
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

/// Integer that may arrive as a JSON number or a numeric string
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn default_button_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient::<D, i64>(deserializer)?.unwrap_or(0))
}

/// A relay channel of a switch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Button {
    #[serde(default, deserialize_with = "default_button_id")]
    pub button_id: i64,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Relay state; only a real boolean counts
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub switch_state: Option<bool>,

    /// `dpb_state`, `power_on_state`, `mode`, `toggle_delay`, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Button {
    /// Button name, `Button <id>` when the API has none
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Button {}", self.button_id))
    }
}

/// A firmware image offered for a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_code: Option<Value>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub require_client_update: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient::<D, bool>(deserializer)?.unwrap_or(false))
}

/// A device as returned by the device list and the device detail endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Device type code, e.g. `SW200LV1`
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<bool>,

    /// Wi-Fi signal strength in dBm
    #[serde(default, deserialize_with = "lenient_int", skip_serializing_if = "Option::is_none")]
    pub sstr: Option<i64>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub is_hub: Option<bool>,

    /// Hub this device is attached to
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub slave_id: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub loc_id: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub is_updating: Option<bool>,

    /// Firmware update progress
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub perc: Option<Number>,

    #[serde(default, deserialize_with = "lenient_vec", skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,

    #[serde(default, deserialize_with = "lenient_vec", skip_serializing_if = "Vec::is_empty")]
    pub next_firmware: Vec<FirmwareInfo>,

    /// Keys not modelled above (`period`, `pat_period`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    /// The firmware candidate, if the API offers one
    pub fn next_firmware(&self) -> Option<&FirmwareInfo> {
        self.next_firmware.first()
    }

    pub fn button(&self, button_id: i64) -> Option<&Button> {
        self.buttons.iter().find(|b| b.button_id == button_id)
    }

    /// Non-empty device id
    pub fn id(&self) -> Option<&str> {
        self.device_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_fields() {
        let device: Device = serde_json::from_value(json!({
            "device_id": "A0B1C2D3E4F5",
            "name": "Kitchen",
            "model_name": "SW200LV1",
            "firmware_version": "1.0.3",
            "connection_status": true,
            "sstr": "-61",
            "is_hub": false,
            "slave_id": "HUB000000001",
            "perc": 45,
            "period": 30,
            "buttons": [
                {"button_id": 1, "name": "Light", "switch_state": true, "dpb_state": false},
                {"button_id": 2, "switch_state": "on"}
            ],
            "next_firmware": [
                {"version_name": "1.0.4", "file_name": "sw200_104.bin", "version_code": 104}
            ]
        }))
        .unwrap();

        assert_eq!(device.id(), Some("A0B1C2D3E4F5"));
        assert_eq!(device.sstr, Some(-61));
        assert_eq!(device.perc, Some(Number::from(45)));
        assert_eq!(device.extra.get("period"), Some(&json!(30)));

        let first = device.button(1).unwrap();
        assert_eq!(first.switch_state, Some(true));
        assert_eq!(first.extra.get("dpb_state"), Some(&json!(false)));

        let second = device.button(2).unwrap();
        assert_eq!(second.switch_state, None);
        assert_eq!(second.display_name(), "Button 2");

        let firmware = device.next_firmware().unwrap();
        assert_eq!(firmware.version_name.as_deref(), Some("1.0.4"));
        assert_eq!(firmware.version_code, Some(json!(104)));
        assert!(!firmware.require_client_update);
    }

    #[test]
    fn test_wrong_types_read_as_absent() {
        let device: Device = serde_json::from_value(json!({
            "device_id": 42,
            "connection_status": "yes",
            "sstr": "weak",
            "buttons": "none",
            "next_firmware": {"version_name": "1.0.4"}
        }))
        .unwrap();

        assert_eq!(device.device_id, None);
        assert_eq!(device.connection_status, None);
        assert_eq!(device.sstr, None);
        assert!(device.buttons.is_empty());
        assert!(device.next_firmware().is_none());
    }

    #[test]
    fn test_unknown_keys_survive() {
        let raw = json!({
            "device_id": "A0B1C2D3E4F5",
            "pat_period": {"start": "22:00"},
            "buttons": [{"button_id": 1, "toggle_delay": 5}]
        });
        let device: Device = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&device).unwrap(), raw);
    }
}
