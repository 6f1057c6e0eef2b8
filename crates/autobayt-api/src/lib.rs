//! Client for the Autobayt cloud API
//!
//! Three endpoints are used: the device list of a user, the detail of one
//! device, and the trigger endpoint that switches relay buttons.

pub mod client;
pub mod error;
pub mod models;

pub use client::{AutobaytClient, DeviceLookup, DEFAULT_BASE_URL, REQUEST_TIMEOUT};
pub use error::{ApiError, ApiResult};
pub use models::{Button, Device, FirmwareInfo};
