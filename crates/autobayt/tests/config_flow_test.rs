//! Account setup and device discovery flows

mod common;

use autobayt::constants::DOMAIN;
use autobayt_host::config_entries::{ConfigEntrySource, ConfigEntryState};
use autobayt_host::flow::FlowInput;
use autobayt_host::update_coordinator::DataFetcher;
use common::*;
use serde_json::{json, Value};

fn input(value: Value) -> FlowInput {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_user_flow_errors_then_success() {
    let mut harness = TestHarness::new().await;
    let hass = harness.hass.clone();

    let form = hass
        .flow_init(DOMAIN, ConfigEntrySource::User, None)
        .await
        .unwrap();
    assert!(form.is_form());
    assert_eq!(form.step_id.as_deref(), Some("user"));
    assert_eq!(form.data_schema[0].name, "user_id");
    assert!(form.data_schema[0].required);

    let result = hass
        .flow_configure(&form.flow_id, Some(input(json!({"user_id": "too-short"}))))
        .await
        .unwrap();
    assert_eq!(result.errors.get("user_id").map(String::as_str), Some("invalid_user_id_length"));

    let unreachable = harness.mock_user_devices(USER_ID, 500, "").await;
    let result = hass
        .flow_configure(&form.flow_id, Some(input(json!({"user_id": USER_ID}))))
        .await
        .unwrap();
    assert_eq!(result.errors.get("base").map(String::as_str), Some("cannot_connect"));
    unreachable.remove_async().await;

    let empty = harness.mock_user_devices(USER_ID, 200, "[]").await;
    let result = hass
        .flow_configure(&form.flow_id, Some(input(json!({"user_id": USER_ID}))))
        .await
        .unwrap();
    assert_eq!(result.errors.get("base").map(String::as_str), Some("no_devices_found"));
    empty.remove_async().await;

    let _account = harness.mock_account().await;
    let result = hass
        .flow_configure(&form.flow_id, Some(input(json!({"user_id": format!(" {} ", USER_ID)}))))
        .await
        .unwrap();
    assert!(result.is_create_entry());
    assert_eq!(result.title.as_deref(), Some("Autobayt"));
    assert_eq!(result.data.get("user_id"), Some(&json!(USER_ID)));

    let entry = harness.entry(result.entry_id.as_deref().unwrap());
    assert_eq!(entry.unique_id.as_deref(), Some(USER_ID));
    assert_eq!(entry.state, ConfigEntryState::Loaded);

    // Same account again
    let again = hass
        .flow_init(DOMAIN, ConfigEntrySource::User, Some(input(json!({"user_id": USER_ID}))))
        .await
        .unwrap();
    assert!(again.is_abort());
    assert_eq!(again.reason.as_deref(), Some("already_configured"));
    assert_eq!(hass.config_entries.get_by_domain(DOMAIN).len(), 1);
}

#[tokio::test]
async fn test_import_aborts_on_invalid_account() {
    let mut harness = TestHarness::new().await;
    let hass = harness.hass.clone();

    let result = hass
        .flow_init(DOMAIN, ConfigEntrySource::Import, Some(input(json!({"user_id": "abc"}))))
        .await
        .unwrap();
    assert!(result.is_abort());
    assert_eq!(result.reason.as_deref(), Some("invalid_user_id_length"));

    let _account = harness.mock_account().await;
    let result = hass
        .flow_init(DOMAIN, ConfigEntrySource::Import, Some(input(json!({"user_id": USER_ID}))))
        .await
        .unwrap();
    assert!(result.is_create_entry());
    let entry = harness.entry(result.entry_id.as_deref().unwrap());
    assert_eq!(entry.source, ConfigEntrySource::Import);
}

#[tokio::test]
async fn test_account_discovers_each_device_once() {
    let mut harness = TestHarness::new().await;
    let _account = harness.mock_account().await;

    let account = harness.add_account_entry().await;
    assert_eq!(account.state, ConfigEntryState::Loaded);

    // The entry without a device id is never offered
    let flows = harness.discovery_flows();
    assert_eq!(flows.len(), 2);

    let kitchen = &flows[KITCHEN_ID];
    let placeholders = &kitchen.description_placeholders;
    assert_eq!(placeholders["name"], "Kitchen");
    assert_eq!(placeholders["device_name"], "Kitchen");
    assert_eq!(placeholders["model_name"], "SW200LV1");
    assert_eq!(placeholders["device_type"], "Smart Switch Double");
    assert_eq!(placeholders["button_count"], "2");
    assert_eq!(placeholders["firmware_version"], "1.0.3");
    assert_eq!(placeholders["connection_status"], "Online");

    let hallway = &flows[HALLWAY_ID];
    assert_eq!(hallway.description_placeholders["device_type"], "Smart Switch Single");
    assert_eq!(hallway.description_placeholders["connection_status"], "Offline");

    // Later polls do not offer the same devices again
    let coordinator = harness.coordinator(&account.entry_id);
    coordinator.request_refresh().await;
    coordinator.request_refresh().await;
    assert_eq!(harness.discovery_flows().len(), 2);
    assert!(coordinator.discovered_device(KITCHEN_ID).is_some());
}

#[tokio::test]
async fn test_confirm_discovery_creates_device_entry() {
    let mut harness = TestHarness::new().await;
    let _account = harness.mock_account().await;
    harness.add_account_entry().await;

    let flow_id = harness.discovery_flows()[KITCHEN_ID].flow_id.clone();
    let result = harness
        .hass
        .flow_configure(&flow_id, Some(FlowInput::new()))
        .await
        .unwrap();

    assert!(result.is_create_entry());
    assert_eq!(result.title.as_deref(), Some("Kitchen"));
    assert_eq!(result.data["device_id"], json!(KITCHEN_ID));
    assert_eq!(result.data["user_id"], json!(USER_ID));
    assert_eq!(result.data["device_data"]["model_name"], json!("SW200LV1"));
    // Buttons come from the detail fetched at confirmation, not the list
    assert_eq!(result.data["device_data"]["buttons"][0]["name"], json!("Ceiling"));

    let entry = harness.entry(result.entry_id.as_deref().unwrap());
    assert_eq!(entry.state, ConfigEntryState::Loaded);
    assert_eq!(entry.unique_id.as_deref(), Some(KITCHEN_ID));
    harness.assert_state("switch.kitchen_ceiling", "on");
    harness.assert_state("sensor.kitchen_connection", "connected");

    let remaining = harness.discovery_flows();
    assert_eq!(remaining.len(), 1);
    assert!(remaining.contains_key(HALLWAY_ID));
}

#[tokio::test]
async fn test_deleted_device_is_not_offered() {
    let mut harness = TestHarness::new().await;
    let devices = load_json_fixture("user_devices.json").to_string();
    let kitchen = load_json_fixture("device_detail.json").to_string();
    let _list = harness.mock_user_devices(USER_ID, 200, &devices).await;
    let _kitchen = harness.mock_device_detail(KITCHEN_ID, 200, &kitchen).await;
    let _hallway = harness.mock_device_detail(HALLWAY_ID, 404, "").await;

    harness.add_account_entry().await;

    let flows = harness.discovery_flows();
    assert_eq!(flows.len(), 1);
    assert!(flows.contains_key(KITCHEN_ID));
}

#[tokio::test]
async fn test_empty_detail_counts_as_deleted() {
    let mut harness = TestHarness::new().await;
    let devices = load_json_fixture("user_devices.json").to_string();
    let hallway = load_json_fixture("hallway_detail.json").to_string();
    let _list = harness.mock_user_devices(USER_ID, 200, &devices).await;
    let _kitchen = harness.mock_device_detail(KITCHEN_ID, 200, "{}").await;
    let _hallway = harness.mock_device_detail(HALLWAY_ID, 200, &hallway).await;

    harness.add_account_entry().await;

    let flows = harness.discovery_flows();
    assert_eq!(flows.len(), 1);
    assert!(flows.contains_key(HALLWAY_ID));
    assert!(harness
        .hass
        .config_entries
        .get_by_unique_id(DOMAIN, KITCHEN_ID)
        .is_none());
}

#[tokio::test]
async fn test_confirm_keeps_device_id_missing_from_detail() {
    let mut harness = TestHarness::new().await;
    let devices = load_json_fixture("user_devices.json").to_string();
    let mut kitchen = load_json_fixture("device_detail.json");
    kitchen.as_object_mut().unwrap().remove("device_id");
    let _list = harness.mock_user_devices(USER_ID, 200, &devices).await;
    let _kitchen = harness
        .mock_device_detail(KITCHEN_ID, 200, &kitchen.to_string())
        .await;
    let _hallway = harness.mock_device_detail(HALLWAY_ID, 404, "").await;

    harness.add_account_entry().await;

    let flows = harness.discovery_flows();
    let flow = &flows[KITCHEN_ID];
    assert_eq!(flow.description_placeholders["device_id"], KITCHEN_ID);

    let result = harness
        .hass
        .flow_configure(&flow.flow_id, Some(FlowInput::new()))
        .await
        .unwrap();
    assert!(result.is_create_entry());
    assert_eq!(result.data["device_id"], json!(KITCHEN_ID));
    assert_eq!(result.data["device_data"]["device_id"], json!(KITCHEN_ID));

    let entry = harness.entry(result.entry_id.as_deref().unwrap());
    assert_eq!(entry.unique_id.as_deref(), Some(KITCHEN_ID));
    assert!(!harness.hass.entities_for_entry(&entry.entry_id).is_empty());
    harness.assert_state("switch.kitchen_ceiling", "on");
}

#[tokio::test]
async fn test_discovery_falls_back_to_list_data() {
    let mut harness = TestHarness::new().await;
    let devices = load_json_fixture("user_devices.json").to_string();
    let _list = harness.mock_user_devices(USER_ID, 200, &devices).await;
    let _kitchen = harness.mock_device_detail(KITCHEN_ID, 502, "").await;
    let _hallway = harness.mock_device_detail(HALLWAY_ID, 200, "[1, 2]").await;

    harness.add_account_entry().await;

    let flows = harness.discovery_flows();
    assert_eq!(flows.len(), 2);
    assert_eq!(flows[KITCHEN_ID].description_placeholders["name"], "Kitchen");
    assert_eq!(flows[HALLWAY_ID].description_placeholders["name"], "Hallway");
}

#[tokio::test]
async fn test_ignored_device_is_not_offered() {
    let mut harness = TestHarness::new().await;
    let _account = harness.mock_account().await;

    let ignored = harness
        .hass
        .flow_init(
            DOMAIN,
            ConfigEntrySource::Ignore,
            Some(input(json!({"unique_id": HALLWAY_ID}))),
        )
        .await
        .unwrap();
    assert!(ignored.is_create_entry());
    assert_eq!(ignored.title.as_deref(), Some("Ignored Device"));
    let entry = harness.entry(ignored.entry_id.as_deref().unwrap());
    assert!(entry.is_ignored());
    assert_eq!(entry.state, ConfigEntryState::NotLoaded);

    harness.add_account_entry().await;

    let flows = harness.discovery_flows();
    assert_eq!(flows.len(), 1);
    assert!(flows.contains_key(KITCHEN_ID));
}
