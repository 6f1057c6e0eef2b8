//! Config and options flows
//!
//! Account entries come from the `user` step (or `import` from server
//! configuration). Device entries come from `discovery` flows started by the
//! account coordinator and confirmed by the user.

use std::collections::HashMap;

use async_trait::async_trait;
use autobayt_api::{AutobaytClient, Device, DeviceLookup};
use autobayt_host::config_entries::ConfigEntry;
use autobayt_host::flow::{
    ConfigFlow, FieldKind, FlowError, FlowInput, FlowResult, FormField, OptionsFlow,
};
use autobayt_host::Hass;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::constants::{
    ACCOUNT_TITLE, CONF_DEVICE_DATA, CONF_DEVICE_ID, CONF_USER_ID, DOMAIN,
    OPTION_FIRMWARE_BINARY_SENSOR, USER_ID_LENGTH,
};
use crate::device_types::device_type;

pub const ERROR_INVALID_USER_ID_LENGTH: &str = "invalid_user_id_length";
pub const ERROR_CANNOT_CONNECT: &str = "cannot_connect";
pub const ERROR_NO_DEVICES_FOUND: &str = "no_devices_found";

pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";
pub const ABORT_NO_DEVICE_DATA: &str = "no_device_data";
pub const ABORT_DEVICE_DELETED: &str = "device_deleted";

pub const IGNORED_TITLE: &str = "Ignored Device";

fn input_str<'a>(input: &'a FlowInput, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// `Autobayt <model>` for a device without a name
fn display_name(device: &Device) -> String {
    device
        .name
        .clone()
        .unwrap_or_else(|| format!("Autobayt {}", device.model_name.as_deref().unwrap_or("")))
}

pub struct AutobaytConfigFlow {
    client: AutobaytClient,
    unique_id: Option<String>,
    discovered: Option<Device>,
    user_id: Option<String>,
}

impl AutobaytConfigFlow {
    pub fn new(client: AutobaytClient) -> Self {
        Self {
            client,
            unique_id: None,
            discovered: None,
            user_id: None,
        }
    }

    fn user_form(errors: HashMap<String, String>) -> FlowResult {
        FlowResult::form("user")
            .with_schema(vec![FormField::required(CONF_USER_ID, FieldKind::String)])
            .with_errors(errors)
    }

    /// Validate a user id; `Err` carries the `(field, error)` to report
    async fn validate_user_id(
        &mut self,
        hass: &Hass,
        user_id: &str,
    ) -> Result<Option<FlowResult>, (&'static str, &'static str)> {
        if user_id.chars().count() != USER_ID_LENGTH {
            return Err((CONF_USER_ID, ERROR_INVALID_USER_ID_LENGTH));
        }

        let devices = match self.client.user_devices(user_id).await {
            Ok(devices) => devices,
            Err(err) => {
                error!("Error fetching user devices: {}", err);
                return Err(("base", ERROR_CANNOT_CONNECT));
            }
        };
        if devices.is_empty() {
            return Err(("base", ERROR_NO_DEVICES_FOUND));
        }

        self.unique_id = Some(user_id.to_string());
        if hass.config_entries.get_by_unique_id(DOMAIN, user_id).is_some() {
            return Ok(Some(FlowResult::abort(ABORT_ALREADY_CONFIGURED)));
        }
        Ok(None)
    }

    fn account_entry(user_id: &str) -> FlowResult {
        FlowResult::create_entry(
            ACCOUNT_TITLE,
            HashMap::from([(CONF_USER_ID.to_string(), Value::from(user_id))]),
        )
    }

    async fn step_user(
        &mut self,
        hass: &Hass,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let Some(input) = user_input else {
            return Ok(Self::user_form(HashMap::new()));
        };
        let user_id = input_str(&input, CONF_USER_ID).unwrap_or_default().trim().to_string();

        match self.validate_user_id(hass, &user_id).await {
            Ok(Some(abort)) => Ok(abort),
            Ok(None) => Ok(Self::account_entry(&user_id)),
            Err((field, error)) => Ok(Self::user_form(HashMap::from([(
                field.to_string(),
                error.to_string(),
            )]))),
        }
    }

    /// Account from server configuration; validation errors abort
    async fn step_import(
        &mut self,
        hass: &Hass,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let input = user_input.unwrap_or_default();
        let user_id = input_str(&input, CONF_USER_ID).unwrap_or_default().trim().to_string();

        match self.validate_user_id(hass, &user_id).await {
            Ok(Some(abort)) => Ok(abort),
            Ok(None) => Ok(Self::account_entry(&user_id)),
            Err((_, error)) => Ok(FlowResult::abort(error)),
        }
    }

    async fn step_discovery(
        &mut self,
        hass: &Hass,
        discovery_info: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let info = discovery_info.unwrap_or_default();
        let Some(device_id) = input_str(&info, CONF_DEVICE_ID).filter(|id| !id.is_empty()) else {
            return Ok(FlowResult::abort(ABORT_NO_DEVICE_DATA));
        };

        self.unique_id = Some(device_id.to_string());
        if hass.config_entries.get_by_unique_id(DOMAIN, device_id).is_some() {
            return Ok(FlowResult::abort(ABORT_ALREADY_CONFIGURED));
        }

        let mut device: Device = info
            .get(CONF_DEVICE_DATA)
            .and_then(|data| serde_json::from_value(data.clone()).ok())
            .unwrap_or_default();
        if device.device_id.is_none() {
            device.device_id = Some(device_id.to_string());
        }
        self.discovered = Some(device);
        self.user_id = input_str(&info, CONF_USER_ID).map(str::to_string);

        self.step_discovery_confirm(None).await
    }

    async fn step_discovery_confirm(
        &mut self,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let Some(mut device) = self.discovered.clone() else {
            return Ok(FlowResult::abort(ABORT_NO_DEVICE_DATA));
        };
        let device_id = device.id().unwrap_or_default().to_string();

        if user_input.is_some() {
            let device_data = serde_json::to_value(&device).unwrap_or(Value::Null);
            let data = HashMap::from([
                (CONF_DEVICE_ID.to_string(), Value::from(device_id)),
                (CONF_DEVICE_DATA.to_string(), device_data),
                (
                    CONF_USER_ID.to_string(),
                    self.user_id.clone().map(Value::from).unwrap_or(Value::Null),
                ),
            ]);
            return Ok(FlowResult::create_entry(display_name(&device), data));
        }

        match self.client.device_detail(&device_id).await {
            Ok(DeviceLookup::Found(mut latest)) => {
                info!("Fetched latest device info for {}", device_id);
                if latest.id().is_none() {
                    latest.device_id = Some(device_id.clone());
                }
                device = latest;
                self.discovered = Some(device.clone());
            }
            Ok(DeviceLookup::Deleted) => {
                warn!("Device {} no longer exists, aborting", device_id);
                return Ok(FlowResult::abort(ABORT_DEVICE_DELETED));
            }
            Ok(DeviceLookup::Unexpected) | Err(_) => {
                warn!(
                    "Could not fetch latest device info for {}, using discovery data",
                    device_id
                );
            }
        }

        let model_name = device.model_name.clone().unwrap_or_default();
        let (type_name, button_count) = device_type(&model_name)
            .map(|t| (t.name, t.buttons))
            .unwrap_or(("Unknown", 1));
        let online = device.connection_status.unwrap_or(false);

        let placeholders = HashMap::from([
            ("name".to_string(), display_name(&device)),
            ("model".to_string(), model_name.clone()),
            ("device_name".to_string(), display_name(&device)),
            ("model_name".to_string(), model_name),
            ("device_type".to_string(), type_name.to_string()),
            ("device_id".to_string(), device.id().unwrap_or_default().to_string()),
            (
                "firmware_version".to_string(),
                device
                    .firmware_version
                    .clone()
                    .unwrap_or_else(|| "Unknown".into()),
            ),
            ("button_count".to_string(), button_count.to_string()),
            (
                "connection_status".to_string(),
                if online { "Online" } else { "Offline" }.to_string(),
            ),
        ]);

        Ok(FlowResult::form("discovery_confirm").with_placeholders(placeholders))
    }

    fn step_ignore(&mut self, user_input: Option<FlowInput>) -> FlowResult {
        if let Some(unique_id) = user_input
            .as_ref()
            .and_then(|input| input_str(input, "unique_id"))
        {
            self.unique_id = Some(unique_id.to_string());
        }
        FlowResult::create_entry(IGNORED_TITLE, HashMap::new())
    }
}

#[async_trait]
impl ConfigFlow for AutobaytConfigFlow {
    async fn async_step(
        &mut self,
        hass: &Hass,
        step_id: &str,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        match step_id {
            "user" => self.step_user(hass, user_input).await,
            "import" => self.step_import(hass, user_input).await,
            "discovery" => self.step_discovery(hass, user_input).await,
            "discovery_confirm" => self.step_discovery_confirm(user_input).await,
            "ignore" => Ok(self.step_ignore(user_input)),
            other => Err(FlowError::UnknownStep(other.to_string())),
        }
    }

    fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }
}

/// Entry options: whether to add the firmware binary sensor
#[derive(Default)]
pub struct AutobaytOptionsFlow;

#[async_trait]
impl OptionsFlow for AutobaytOptionsFlow {
    async fn async_step(
        &mut self,
        _hass: &Hass,
        entry: &ConfigEntry,
        step_id: &str,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        match (step_id, user_input) {
            ("init", _) | ("user", None) => {
                let current = entry.option_bool(OPTION_FIRMWARE_BINARY_SENSOR, false);
                Ok(FlowResult::form("user").with_schema(vec![FormField::optional(
                    OPTION_FIRMWARE_BINARY_SENSOR,
                    FieldKind::Boolean,
                    Value::Bool(current),
                )]))
            }
            ("user", Some(input)) => {
                let enabled = input
                    .get(OPTION_FIRMWARE_BINARY_SENSOR)
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let options = HashMap::from([(
                    OPTION_FIRMWARE_BINARY_SENSOR.to_string(),
                    Value::Bool(enabled),
                )]);
                Ok(FlowResult::create_entry("", options))
            }
            (other, _) => Err(FlowError::UnknownStep(other.to_string())),
        }
    }
}
