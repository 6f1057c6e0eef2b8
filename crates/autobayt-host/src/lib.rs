//! Host runtime for the Autobayt integration
//!
//! A small home-automation host: entity ids and states, a service registry,
//! JSON `.storage` persistence, config entries, device and entity
//! registries, config and options flows, the entity platform and the
//! generic polling coordinator integrations build on.

mod context;
mod entity_id;
mod state;

pub mod config_entries;
pub mod device_registry;
pub mod entity;
pub mod entity_registry;
pub mod flow;
pub mod hass;
pub mod integration;
pub mod services;
pub mod storage;
pub mod update_coordinator;

pub use context::Context;
pub use entity_id::{slugify, EntityId, EntityIdError};
pub use hass::{Hass, HassError, HassResult, PlatformEntity};
pub use state::{
    State, StateChanged, StateMachine, MAX_STATE_LENGTH, STATE_UNAVAILABLE, STATE_UNKNOWN,
};
