//! Switch platform: one switch per relay button

use std::sync::Arc;

use async_trait::async_trait;
use autobayt_host::config_entries::ConfigEntry;
use autobayt_host::device_registry::DeviceInfo;
use autobayt_host::entity::{Entity, SwitchControl};
use autobayt_host::update_coordinator::DataFetcher;
use autobayt_host::Hass;
use tracing::{debug, error};

use crate::coordinator::AutobaytCoordinator;
use crate::entity::{stored_device, AutobaytEntity};

pub struct AutobaytSwitch {
    base: AutobaytEntity,
    button_id: i64,
    button_name: String,
}

impl AutobaytSwitch {
    pub fn new(base: AutobaytEntity, button_id: i64, button_name: impl Into<String>) -> Self {
        Self {
            base,
            button_id,
            button_name: button_name.into(),
        }
    }

    async fn set_state(&self, state: bool) {
        let coordinator = self.base.coordinator();
        match coordinator
            .client()
            .trigger(self.base.device_id(), self.button_id, state)
            .await
        {
            Ok(()) => {
                debug!(
                    "Set switch state for device {} button {} to {}",
                    self.base.device_id(),
                    self.button_id,
                    state
                );
                coordinator.request_refresh().await;
            }
            Err(err) => {
                error!(
                    "Failed to set switch state for device {} button {}: {}",
                    self.base.device_id(),
                    self.button_id,
                    err
                );
            }
        }
    }
}

impl Entity for AutobaytSwitch {
    fn domain(&self) -> &'static str {
        "switch"
    }

    fn unique_id(&self) -> String {
        self.base.unique_id(&format!("button_{}", self.button_id))
    }

    fn name(&self) -> Option<String> {
        Some(format!("{} {}", self.base.device_name(), self.button_name))
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn native_state(&self) -> Option<String> {
        self.is_on()
            .map(|on| if on { "on" } else { "off" }.to_string())
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(self.base.device_info())
    }

    fn as_switch(&self) -> Option<&dyn SwitchControl> {
        Some(self)
    }
}

#[async_trait]
impl SwitchControl for AutobaytSwitch {
    fn is_on(&self) -> Option<bool> {
        self.base
            .device()?
            .button(self.button_id)?
            .switch_state
    }

    async fn turn_on(&self) {
        self.set_state(true).await;
    }

    async fn turn_off(&self) {
        self.set_state(false).await;
    }
}

/// Add a switch for every button stored on the entry
pub async fn setup_entry(
    hass: &Hass,
    entry: &ConfigEntry,
    coordinator: &Arc<AutobaytCoordinator>,
) {
    let Some((device_id, device)) = stored_device(entry) else {
        return;
    };
    coordinator.add_device(&device_id).await;

    let entities: Vec<Arc<dyn Entity>> = device
        .buttons
        .iter()
        .map(|button| {
            let base =
                AutobaytEntity::new(Arc::clone(coordinator), &device_id, device.name.as_deref());
            Arc::new(AutobaytSwitch::new(base, button.button_id, button.display_name()))
                as Arc<dyn Entity>
        })
        .collect();
    debug!("Adding {} switches for device {}", entities.len(), device_id);
    hass.add_entities(entry, entities);
}
