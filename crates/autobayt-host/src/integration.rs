//! Integration interface
//!
//! An integration owns one domain. The host calls into it for each config
//! entry of that domain and asks it for flows.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config_entries::ConfigEntry;
use crate::flow::{ConfigFlow, OptionsFlow};
use crate::Hass;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// The remote side is not reachable yet; the entry goes to `SetupRetry`
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Setup failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Integration: Send + Sync {
    fn domain(&self) -> &'static str;

    async fn setup_entry(&self, hass: &Arc<Hass>, entry: &ConfigEntry) -> Result<(), SetupError>;

    /// Release everything set up for the entry; `false` if that failed
    async fn unload_entry(&self, hass: &Arc<Hass>, entry: &ConfigEntry) -> bool;

    /// Clean up after the entry has been deleted
    async fn remove_entry(&self, _hass: &Arc<Hass>, _entry: &ConfigEntry) {}

    fn config_flow(&self) -> Box<dyn ConfigFlow>;

    fn options_flow(&self, _entry: &ConfigEntry) -> Option<Box<dyn OptionsFlow>> {
        None
    }
}
