//! Integration constants

use std::time::Duration;

pub const DOMAIN: &str = "autobayt";
pub const MANUFACTURER: &str = "Autobayt";

pub const CONF_USER_ID: &str = "user_id";
pub const CONF_DEVICE_ID: &str = "device_id";
pub const CONF_DEVICE_DATA: &str = "device_data";

/// Entry option enabling the diagnostic firmware binary sensor
pub const OPTION_FIRMWARE_BINARY_SENSOR: &str = "firmware_binary_sensor";

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(290);
pub const DEFAULT_DEVICE_NAME: &str = "Autobayt Device";

/// Title of the account entry
pub const ACCOUNT_TITLE: &str = "Autobayt";

/// Length of an Autobayt user id (a Mongo object id)
pub const USER_ID_LENGTH: usize = 24;
