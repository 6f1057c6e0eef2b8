//! Host plus mocked cloud API

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use autobayt::constants::{CONF_DEVICE_DATA, CONF_DEVICE_ID, CONF_USER_ID, DOMAIN};
use autobayt::{AutobaytCoordinator, AutobaytIntegration};
use autobayt_host::config_entries::{ConfigEntry, ConfigEntrySource};
use autobayt_host::flow::FlowResult;
use autobayt_host::{Hass, State};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use tempfile::TempDir;

use super::fixtures::load_json_fixture;

pub const USER_ID: &str = "65a1b2c3d4e5f60718293a4b";
pub const KITCHEN_ID: &str = "A0B1C2D3E4F5";
pub const HALLWAY_ID: &str = "B1C2D3E4F5A0";

pub struct TestHarness {
    pub hass: Arc<Hass>,
    pub integration: Arc<AutobaytIntegration>,
    pub server: ServerGuard,
    _config_dir: TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let config_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let hass = Hass::new(config_dir.path());

        let integration = Arc::new(
            AutobaytIntegration::new(&server.url(), autobayt::constants::DEFAULT_SCAN_INTERVAL)
                .expect("mock server URL is valid"),
        );
        hass.register_integration(integration.clone());

        Self {
            hass,
            integration,
            server,
            _config_dir: config_dir,
        }
    }

    /// `GET /device?device_id=...`
    pub async fn mock_device_detail(&mut self, device_id: &str, status: usize, body: &str) -> Mock {
        self.server
            .mock("GET", "/device")
            .match_query(Matcher::UrlEncoded("device_id".into(), device_id.into()))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    /// `GET /user/get-things?user_id=...`
    pub async fn mock_user_devices(&mut self, user_id: &str, status: usize, body: &str) -> Mock {
        self.server
            .mock("GET", "/user/get-things")
            .match_query(Matcher::UrlEncoded("user_id".into(), user_id.into()))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    /// Detail and list mocks for the two fixture devices
    pub async fn mock_account(&mut self) -> Vec<Mock> {
        let kitchen = load_json_fixture("device_detail.json").to_string();
        let hallway = load_json_fixture("hallway_detail.json").to_string();
        let devices = load_json_fixture("user_devices.json").to_string();
        vec![
            self.mock_user_devices(USER_ID, 200, &devices).await,
            self.mock_device_detail(KITCHEN_ID, 200, &kitchen).await,
            self.mock_device_detail(HALLWAY_ID, 200, &hallway).await,
        ]
    }

    /// Store a device entry for `device` and set it up
    pub async fn add_device_entry(&self, device: &Value) -> ConfigEntry {
        let device_id = device["device_id"]
            .as_str()
            .expect("fixture has a device_id")
            .to_string();
        let title = device["name"].as_str().unwrap_or("Autobayt Device");
        let data = HashMap::from([
            (CONF_DEVICE_ID.to_string(), json!(device_id)),
            (CONF_DEVICE_DATA.to_string(), device.clone()),
            (CONF_USER_ID.to_string(), json!(USER_ID)),
        ]);
        let entry = ConfigEntry::new(DOMAIN, title)
            .with_data(data)
            .with_unique_id(device_id)
            .with_source(ConfigEntrySource::Discovery);
        self.add_and_setup(entry).await
    }

    /// Store the account entry and set it up
    pub async fn add_account_entry(&self) -> ConfigEntry {
        let entry = ConfigEntry::new(DOMAIN, "Autobayt")
            .with_data(HashMap::from([(CONF_USER_ID.to_string(), json!(USER_ID))]))
            .with_unique_id(USER_ID);
        self.add_and_setup(entry).await
    }

    async fn add_and_setup(&self, entry: ConfigEntry) -> ConfigEntry {
        let entry = self
            .hass
            .config_entries
            .add(entry)
            .await
            .expect("Failed to add config entry");
        let _ = self.hass.setup_entry(&entry.entry_id).await;
        self.entry(&entry.entry_id)
    }

    pub fn entry(&self, entry_id: &str) -> ConfigEntry {
        self.hass
            .config_entries
            .get(entry_id)
            .unwrap_or_else(|| panic!("Config entry {} not found", entry_id))
    }

    pub fn coordinator(&self, entry_id: &str) -> Arc<AutobaytCoordinator> {
        self.integration
            .coordinator(entry_id)
            .unwrap_or_else(|| panic!("No coordinator for entry {}", entry_id))
    }

    pub fn state(&self, entity_id: &str) -> State {
        self.hass
            .states
            .get(entity_id)
            .unwrap_or_else(|| panic!("Entity {} has no state", entity_id))
    }

    pub fn assert_state(&self, entity_id: &str, expected: &str) {
        assert_eq!(
            self.state(entity_id).state,
            expected,
            "unexpected state for {}",
            entity_id
        );
    }

    /// Discovery flows waiting for confirmation, keyed by device id
    pub fn discovery_flows(&self) -> HashMap<String, FlowResult> {
        self.hass
            .flows_in_progress()
            .into_iter()
            .filter(|flow| flow.step_id.as_deref() == Some("discovery_confirm"))
            .filter_map(|flow| {
                let device_id = flow.description_placeholders.get("device_id")?.clone();
                Some((device_id, flow))
            })
            .collect()
    }
}
