//! Config entry lifecycle of the integration

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autobayt_api::{ApiResult, AutobaytClient, DEFAULT_BASE_URL};
use autobayt_host::config_entries::ConfigEntry;
use autobayt_host::flow::{ConfigFlow, OptionsFlow};
use autobayt_host::integration::{Integration, SetupError};
use autobayt_host::update_coordinator::DataFetcher;
use autobayt_host::Hass;
use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::config_flow::{AutobaytConfigFlow, AutobaytOptionsFlow};
use crate::constants::{CONF_DEVICE_ID, CONF_USER_ID, DEFAULT_SCAN_INTERVAL, DOMAIN};
use crate::coordinator::{AutobaytCoordinator, PollMode};
use crate::device::DeviceManager;
use crate::entity::stored_device;
use crate::{binary_sensor, sensor, switch, update};

pub struct AutobaytIntegration {
    client: AutobaytClient,
    scan_interval: Duration,
    coordinators: DashMap<String, Arc<AutobaytCoordinator>>,
}

impl AutobaytIntegration {
    pub fn new(api_base_url: &str, scan_interval: Duration) -> ApiResult<Self> {
        Ok(Self {
            client: AutobaytClient::new(api_base_url)?,
            scan_interval,
            coordinators: DashMap::new(),
        })
    }

    /// Production API, default poll interval
    pub fn production() -> ApiResult<Self> {
        Self::new(DEFAULT_BASE_URL, DEFAULT_SCAN_INTERVAL)
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    /// Coordinator of a loaded entry
    pub fn coordinator(&self, entry_id: &str) -> Option<Arc<AutobaytCoordinator>> {
        self.coordinators.get(entry_id).map(|c| Arc::clone(c.value()))
    }

    fn account_entry(hass: &Hass) -> Option<ConfigEntry> {
        hass.config_entries
            .get_by_domain(DOMAIN)
            .into_iter()
            .find(|e| e.data_str(CONF_DEVICE_ID).is_none() && e.data_str(CONF_USER_ID).is_some())
    }

    async fn setup_platforms(
        hass: &Hass,
        entry: &ConfigEntry,
        coordinator: &Arc<AutobaytCoordinator>,
    ) {
        sensor::setup_entry(hass, entry, coordinator).await;
        switch::setup_entry(hass, entry, coordinator).await;
        binary_sensor::setup_entry(hass, entry, coordinator).await;
        update::setup_entry(hass, entry, coordinator).await;
    }

    /// Re-render the entry's entities and sync the device registry after each refresh
    fn listen(hass: &Arc<Hass>, entry: &ConfigEntry, coordinator: &Arc<AutobaytCoordinator>) {
        let weak_hass = Arc::downgrade(hass);
        let weak_coordinator = Arc::downgrade(coordinator);
        let entry_id = entry.entry_id.clone();

        coordinator.coordinator().add_listener(move || {
            let Some(hass) = weak_hass.upgrade() else {
                return;
            };
            if let Some(data) = weak_coordinator.upgrade().and_then(|c| c.data()) {
                DeviceManager::new(&hass).sync(&data);
            }
            hass.write_entity_states(&entry_id);
        });
    }

    /// Drop a device entry's device, then offer it for discovery again
    async fn cleanup_device_and_rediscover(&self, hass: &Arc<Hass>, device_id: &str) {
        debug!("Cleaning up device: {}", device_id);
        if let Some(device) = hass.device_registry.get_by_identifier(DOMAIN, device_id) {
            hass.remove_device(&device.id, DOMAIN);
        }

        let Some(account) = Self::account_entry(hass).filter(ConfigEntry::is_loaded) else {
            return;
        };
        let Some(coordinator) = self.coordinator(&account.entry_id) else {
            return;
        };

        coordinator.remove_device(device_id);
        coordinator.reset_device_discovery(device_id);
        debug!("Triggering rediscovery for device: {}", device_id);
        coordinator.start_discovery().await;
    }

    /// Drop every Autobayt device and every device entry of the account
    async fn cleanup_integration_devices(&self, hass: &Arc<Hass>, account_entry_id: &str) {
        let devices: Vec<_> = hass
            .device_registry
            .devices()
            .into_iter()
            .filter(|d| d.has_identifier_domain(DOMAIN))
            .collect();
        debug!("Found {} devices to clean up", devices.len());
        for device in devices {
            hass.remove_device(&device.id, DOMAIN);
        }

        let device_entries: Vec<ConfigEntry> = hass
            .config_entries
            .get_by_domain(DOMAIN)
            .into_iter()
            .filter(|e| e.entry_id != account_entry_id && e.data_str(CONF_DEVICE_ID).is_some())
            .collect();
        for entry in device_entries {
            debug!("Removing device config entry: {}", entry.title);
            if let Err(err) = hass.remove_entry(&entry.entry_id).await {
                debug!("Device entry {} already gone: {}", entry.entry_id, err);
            }
        }
    }
}

#[async_trait]
impl Integration for AutobaytIntegration {
    fn domain(&self) -> &'static str {
        DOMAIN
    }

    #[instrument(skip_all, fields(entry_id = %entry.entry_id))]
    async fn setup_entry(&self, hass: &Arc<Hass>, entry: &ConfigEntry) -> Result<(), SetupError> {
        let coordinator = Arc::new(AutobaytCoordinator::new(
            hass,
            entry,
            self.client.clone(),
            self.scan_interval,
        ));
        self.coordinators
            .insert(entry.entry_id.clone(), Arc::clone(&coordinator));

        if let Err(err) = coordinator.first_refresh().await {
            self.coordinators.remove(&entry.entry_id);
            coordinator.shutdown();
            return Err(err);
        }

        if let Some((device_id, device)) = stored_device(entry) {
            DeviceManager::new(hass).register_device(&entry.entry_id, &device_id, &device);
        }

        Self::listen(hass, entry, &coordinator);
        Self::setup_platforms(hass, entry, &coordinator).await;
        coordinator.start_polling();

        if matches!(coordinator.mode(), PollMode::Account { .. }) {
            coordinator.start_discovery().await;
        }
        info!("Set up Autobayt entry {}", entry.title);
        Ok(())
    }

    async fn unload_entry(&self, _hass: &Arc<Hass>, entry: &ConfigEntry) -> bool {
        if let Some((_, coordinator)) = self.coordinators.remove(&entry.entry_id) {
            coordinator.shutdown();
        }
        debug!("Unloaded Autobayt entry {}", entry.entry_id);
        true
    }

    async fn remove_entry(&self, hass: &Arc<Hass>, entry: &ConfigEntry) {
        if let Some(device_id) = entry.data_str(CONF_DEVICE_ID) {
            debug!("Removing device entry - triggering rediscovery");
            self.cleanup_device_and_rediscover(hass, device_id).await;
        } else if entry.data_str(CONF_USER_ID).is_some() {
            debug!("Removing account entry - cleaning up all devices");
            self.cleanup_integration_devices(hass, &entry.entry_id).await;
        }
    }

    fn config_flow(&self) -> Box<dyn ConfigFlow> {
        Box::new(AutobaytConfigFlow::new(self.client.clone()))
    }

    fn options_flow(&self, _entry: &ConfigEntry) -> Option<Box<dyn OptionsFlow>> {
        Some(Box::new(AutobaytOptionsFlow))
    }
}
