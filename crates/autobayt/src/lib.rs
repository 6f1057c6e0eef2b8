//! Autobayt smart switch integration
//!
//! Polls the Autobayt cloud for the devices of an account and exposes them
//! as sensor, switch, binary sensor and update entities. Devices found on the
//! account are offered through discovery flows; each confirmed device gets
//! its own config entry and coordinator.

pub mod binary_sensor;
pub mod brands;
pub mod config_flow;
pub mod constants;
pub mod coordinator;
pub mod device;
pub mod device_types;
pub mod entity;
pub mod sensor;
pub mod setup;
pub mod switch;
pub mod update;

pub use brands::brands_router;
pub use config_flow::{AutobaytConfigFlow, AutobaytOptionsFlow};
pub use constants::DOMAIN;
pub use coordinator::{AutobaytCoordinator, CoordinatorData, PollMode};
pub use device::DeviceManager;
pub use setup::AutobaytIntegration;
