//! Autobayt server
//!
//! Hosts the Autobayt integration: restores config entries, optionally sets
//! up an account from configuration, serves the brand images and polls until
//! Ctrl-C.

mod config;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use autobayt::constants::{CONF_DEVICE_ID, CONF_USER_ID, DOMAIN};
use autobayt::{brands_router, AutobaytIntegration};
use autobayt_host::config_entries::ConfigEntrySource;
use autobayt_host::Hass;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{config_path, Config, CONFIG_ENV_VAR};

fn init_logging(log_level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn has_account_entry(hass: &Hass) -> bool {
    hass.config_entries
        .get_by_domain(DOMAIN)
        .iter()
        .any(|e| e.data_str(CONF_DEVICE_ID).is_none() && e.data_str(CONF_USER_ID).is_some())
}

/// Create the account entry for `user_id` unless one exists
async fn bootstrap_account(hass: &Arc<Hass>, user_id: &str) {
    if has_account_entry(hass) {
        return;
    }
    info!("No Autobayt account configured, importing user {}", user_id);

    let data = HashMap::from([(CONF_USER_ID.to_string(), Value::from(user_id))]);
    match hass
        .flow_init(DOMAIN, ConfigEntrySource::Import, Some(data))
        .await
    {
        Ok(result) if result.is_create_entry() => info!("Autobayt account entry created"),
        Ok(result) => warn!(
            "Autobayt account import did not complete: {}",
            result.reason.as_deref().unwrap_or("unknown")
        ),
        Err(err) => warn!("Autobayt account import failed: {}", err),
    }
}

/// Accept every pending discovery
async fn confirm_discoveries(hass: &Arc<Hass>) {
    let pending: Vec<_> = hass
        .flows_in_progress()
        .into_iter()
        .filter(|flow| flow.handler == DOMAIN && flow.step_id.as_deref() == Some("discovery_confirm"))
        .collect();

    for flow in pending {
        let name = flow
            .description_placeholders
            .get("name")
            .cloned()
            .unwrap_or_default();
        match hass.flow_configure(&flow.flow_id, Some(HashMap::new())).await {
            Ok(result) if result.is_create_entry() => info!("Added Autobayt device {}", name),
            Ok(result) => warn!(
                "Discovery of {} not confirmed: {}",
                name,
                result.reason.as_deref().unwrap_or("unknown")
            ),
            Err(err) => warn!("Discovery of {} failed: {}", name, err),
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", err);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path(std::env::args().nth(1), std::env::var(CONFIG_ENV_VAR).ok());
    let config = Config::load(&path).with_context(|| format!("loading {}", path.display()))?;
    init_logging(&config.log_level);

    info!("Starting Autobayt server");

    let hass = Hass::new(&config.config_dir);
    let integration = Arc::new(
        AutobaytIntegration::new(&config.api_base_url, config.scan_interval())
            .context("creating Autobayt API client")?,
    );
    hass.register_integration(integration);

    hass.config_entries
        .load()
        .await
        .context("loading config entries")?;
    hass.setup_all().await;

    if let Some(user_id) = &config.user_id {
        bootstrap_account(&hass, user_id).await;
    }
    if config.auto_confirm_discovery {
        confirm_discoveries(&hass).await;
    }

    let listener = TcpListener::bind(config.http.bind)
        .await
        .with_context(|| format!("binding {}", config.http.bind))?;
    info!("Serving brand images on http://{}", listener.local_addr()?);

    axum::serve(listener, brands_router(config.http.static_dir.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    hass.unload_all().await;

    Ok(())
}
