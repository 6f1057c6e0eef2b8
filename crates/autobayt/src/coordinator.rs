//! Autobayt data coordinator
//!
//! One coordinator runs per config entry. A device entry polls the detail of
//! its own device. The account entry polls the user's device list, plus the
//! detail of any device handed to [`AutobaytCoordinator::add_device`], and
//! starts a discovery flow for every device it has not seen yet.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use autobayt_api::{ApiResult, AutobaytClient, Device, DeviceLookup};
use autobayt_host::config_entries::{ConfigEntry, ConfigEntrySource};
use autobayt_host::update_coordinator::{DataFetcher, DataUpdateCoordinator, UpdateFailed};
use autobayt_host::Hass;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::constants::{CONF_DEVICE_DATA, CONF_DEVICE_ID, CONF_USER_ID, DOMAIN};
use crate::device_types::{device_type, DeviceType};

/// Snapshot produced by one refresh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorData {
    /// Device list of the account; only set by the account coordinator
    pub user_devices: Option<Vec<Device>>,
    pub device_data: BTreeMap<String, Device>,
}

impl CoordinatorData {
    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.device_data.get(device_id)
    }
}

/// What a coordinator polls, decided by the entry data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollMode {
    Device { device_id: String },
    Account { user_id: String },
    Idle,
}

impl PollMode {
    pub fn for_entry(entry: &ConfigEntry) -> Self {
        if let Some(device_id) = entry.data_str(CONF_DEVICE_ID).filter(|id| !id.is_empty()) {
            PollMode::Device {
                device_id: device_id.to_string(),
            }
        } else if let Some(user_id) = entry.data_str(CONF_USER_ID).filter(|id| !id.is_empty()) {
            PollMode::Account {
                user_id: user_id.to_string(),
            }
        } else {
            PollMode::Idle
        }
    }
}

pub struct AutobaytCoordinator {
    hass: Weak<Hass>,
    client: AutobaytClient,
    entry_id: String,
    mode: PollMode,
    coordinator: DataUpdateCoordinator<CoordinatorData>,
    added_devices: Mutex<BTreeSet<String>>,
    discovered_devices: Mutex<BTreeMap<String, Device>>,
}

impl AutobaytCoordinator {
    pub fn new(
        hass: &Arc<Hass>,
        entry: &ConfigEntry,
        client: AutobaytClient,
        update_interval: Duration,
    ) -> Self {
        Self {
            hass: Arc::downgrade(hass),
            client,
            entry_id: entry.entry_id.clone(),
            mode: PollMode::for_entry(entry),
            coordinator: DataUpdateCoordinator::new(DOMAIN, update_interval),
            added_devices: Mutex::new(BTreeSet::new()),
            discovered_devices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn mode(&self) -> &PollMode {
        &self.mode
    }

    pub fn client(&self) -> &AutobaytClient {
        &self.client
    }

    pub fn data(&self) -> Option<Arc<CoordinatorData>> {
        self.coordinator.data()
    }

    /// Latest snapshot of one device
    pub fn device(&self, device_id: &str) -> Option<Device> {
        self.data().and_then(|data| data.device(device_id).cloned())
    }

    pub fn last_update_success(&self) -> bool {
        self.coordinator.last_update_success()
    }

    /// Monitor a device's detail; refreshes when the device is new
    pub async fn add_device(&self, device_id: &str) {
        let inserted = self
            .added_devices
            .lock()
            .map(|mut added| added.insert(device_id.to_string()))
            .unwrap_or(false);
        if inserted {
            debug!("Monitoring device {}", device_id);
            self.request_refresh().await;
        }
    }

    pub fn remove_device(&self, device_id: &str) {
        if let Ok(mut added) = self.added_devices.lock() {
            added.remove(device_id);
        }
    }

    pub fn added_devices(&self) -> Vec<String> {
        self.added_devices
            .lock()
            .map(|added| added.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget that a device was discovered so the next pass offers it again
    pub fn reset_device_discovery(&self, device_id: &str) {
        let removed = self
            .discovered_devices
            .lock()
            .map(|mut discovered| discovered.remove(device_id).is_some())
            .unwrap_or(false);
        if removed {
            debug!("Reset discovery for device {}", device_id);
        }
    }

    pub fn discovered_device(&self, device_id: &str) -> Option<Device> {
        self.discovered_devices
            .lock()
            .ok()
            .and_then(|discovered| discovered.get(device_id).cloned())
    }

    pub fn device_type_info(&self, model_name: &str) -> Option<&'static DeviceType> {
        device_type(model_name)
    }

    /// Remember `device` as discovered; `false` if it already was
    fn mark_discovered(&self, device_id: &str, device: &Device) -> bool {
        self.discovered_devices
            .lock()
            .map(|mut discovered| {
                if discovered.contains_key(device_id) {
                    false
                } else {
                    discovered.insert(device_id.to_string(), device.clone());
                    true
                }
            })
            .unwrap_or(false)
    }

    /// Start a discovery flow for every listed device not seen before
    pub async fn start_discovery(&self) {
        let PollMode::Account { user_id } = &self.mode else {
            return;
        };
        let Some(hass) = self.hass.upgrade() else {
            return;
        };
        let Some(user_devices) = self.data().and_then(|data| data.user_devices.clone()) else {
            return;
        };

        for device in user_devices {
            let Some(device_id) = device.id().map(str::to_string) else {
                continue;
            };
            if !self.mark_discovered(&device_id, &device) {
                continue;
            }

            let device_data = match serde_json::to_value(&device) {
                Ok(value) => value,
                Err(err) => {
                    warn!("Cannot encode discovered device {}: {}", device_id, err);
                    continue;
                }
            };
            let flow_data = HashMap::from([
                (CONF_DEVICE_ID.to_string(), Value::String(device_id.clone())),
                (CONF_DEVICE_DATA.to_string(), device_data),
                (CONF_USER_ID.to_string(), Value::String(user_id.clone())),
            ]);

            match hass
                .flow_init(DOMAIN, ConfigEntrySource::Discovery, Some(flow_data))
                .await
            {
                Ok(_) => info!(
                    "Discovered Autobayt device: {} ({})",
                    device.name.as_deref().unwrap_or("Unknown"),
                    device_id
                ),
                Err(err) => warn!("Discovery flow for {} failed: {}", device_id, err),
            }
        }
    }

    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }

    async fn fetch_device(&self, device_id: &str) -> ApiResult<Option<Device>> {
        match self.client.device_detail(device_id).await? {
            DeviceLookup::Found(device) => Ok(Some(device)),
            DeviceLookup::Deleted => {
                debug!("Device {} has been deleted", device_id);
                Ok(None)
            }
            DeviceLookup::Unexpected => Ok(None),
        }
    }

    async fn fetch_snapshot(&self) -> ApiResult<CoordinatorData> {
        let mut data = CoordinatorData::default();
        match &self.mode {
            PollMode::Device { device_id } => {
                if let Some(device) = self.fetch_device(device_id).await? {
                    data.device_data.insert(device_id.clone(), device);
                }
            }
            PollMode::Account { user_id } => {
                let user_devices = self.client.user_devices(user_id).await?;
                if !user_devices.is_empty() {
                    for device_id in self.added_devices() {
                        if let Some(device) = self.fetch_device(&device_id).await? {
                            data.device_data.insert(device_id, device);
                        }
                    }
                }
                data.user_devices = Some(user_devices);
            }
            PollMode::Idle => {}
        }
        Ok(data)
    }
}

#[async_trait]
impl DataFetcher<CoordinatorData> for AutobaytCoordinator {
    fn coordinator(&self) -> &DataUpdateCoordinator<CoordinatorData> {
        &self.coordinator
    }

    async fn fetch(&self) -> Result<CoordinatorData, UpdateFailed> {
        self.fetch_snapshot()
            .await
            .map_err(|err| UpdateFailed(format!("Error communicating with Autobayt API: {}", err)))
    }

    async fn refreshed(&self) {
        if matches!(self.mode, PollMode::Account { .. }) {
            self.start_discovery().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(data: Value) -> ConfigEntry {
        let data: HashMap<String, Value> = serde_json::from_value(data).unwrap();
        ConfigEntry::new(DOMAIN, "test").with_data(data)
    }

    #[test]
    fn test_poll_mode_for_entry() {
        assert_eq!(
            PollMode::for_entry(&entry(json!({"device_id": "A0B1", "user_id": "u"}))),
            PollMode::Device {
                device_id: "A0B1".into()
            }
        );
        assert_eq!(
            PollMode::for_entry(&entry(json!({"user_id": "u"}))),
            PollMode::Account {
                user_id: "u".into()
            }
        );
        assert_eq!(PollMode::for_entry(&entry(json!({}))), PollMode::Idle);
        assert_eq!(
            PollMode::for_entry(&entry(json!({"device_id": ""}))),
            PollMode::Idle
        );
    }

    #[tokio::test]
    async fn test_idle_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let hass = Hass::new(dir.path());
        let client = AutobaytClient::new("http://127.0.0.1:9").unwrap();
        let coordinator =
            AutobaytCoordinator::new(&hass, &entry(json!({})), client, Duration::from_secs(290));

        tokio_test::assert_ok!(coordinator.first_refresh().await);
        assert_eq!(*coordinator.data().unwrap(), CoordinatorData::default());
    }

    #[tokio::test]
    async fn test_discovery_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let hass = Hass::new(dir.path());
        let client = AutobaytClient::new("http://127.0.0.1:9").unwrap();
        let coordinator = AutobaytCoordinator::new(
            &hass,
            &entry(json!({"user_id": "u"})),
            client,
            Duration::from_secs(290),
        );
        let device = Device {
            device_id: Some("A0B1".into()),
            ..Default::default()
        };

        assert!(coordinator.mark_discovered("A0B1", &device));
        assert!(!coordinator.mark_discovered("A0B1", &device));
        assert_eq!(coordinator.discovered_device("A0B1"), Some(device.clone()));

        coordinator.reset_device_discovery("A0B1");
        assert!(coordinator.discovered_device("A0B1").is_none());
        assert!(coordinator.mark_discovered("A0B1", &device));

        assert_eq!(
            coordinator.device_type_info("SW300LV1").map(|t| t.buttons),
            Some(3)
        );
    }
}
