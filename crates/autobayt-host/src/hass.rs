//! The host instance
//!
//! `Hass` ties the registries, the state machine and the config entries
//! together. It drives config entry lifecycles, runs config and options
//! flows, and acts as the entity platform for integrations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config_entries::{
    ConfigEntries, ConfigEntriesError, ConfigEntry, ConfigEntrySource, ConfigEntryState,
    ConfigEntryUpdate,
};
use crate::device_registry::DeviceRegistry;
use crate::entity::{friendly_name, render_state, Entity};
use crate::entity_registry::{EntityRegistration, EntityRegistry};
use crate::flow::{ConfigFlow, FlowError, FlowInput, FlowResult, FlowResultType, OptionsFlow};
use crate::integration::{Integration, SetupError};
use crate::services::{ServiceCall, ServiceError, ServiceRegistry};
use crate::storage::Storage;
use crate::{Context, EntityId, StateMachine};

pub const SWITCH_DOMAIN: &str = "switch";
pub const SERVICE_TURN_ON: &str = "turn_on";
pub const SERVICE_TURN_OFF: &str = "turn_off";
pub const SERVICE_TOGGLE: &str = "toggle";

#[derive(Debug, Error)]
pub enum HassError {
    #[error("Integration not found: {0}")]
    UnknownIntegration(String),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("Unload failed for entry {0}")]
    UnloadFailed(String),
}

pub type HassResult<T> = Result<T, HassError>;

/// An entity added through [`Hass::add_entities`]
#[derive(Clone)]
pub struct PlatformEntity {
    pub entity_id: EntityId,
    pub config_entry_id: String,
    pub entity: Arc<dyn Entity>,
}

struct ConfigFlowProgress {
    flow_id: String,
    handler: String,
    source: ConfigEntrySource,
    step_id: String,
    flow: Box<dyn ConfigFlow>,
    last_result: FlowResult,
}

struct OptionsFlowProgress {
    entry_id: String,
    step_id: String,
    flow: Box<dyn OptionsFlow>,
}

pub struct Hass {
    config_dir: PathBuf,
    pub states: StateMachine,
    pub services: ServiceRegistry,
    pub config_entries: ConfigEntries,
    pub device_registry: DeviceRegistry,
    pub entity_registry: EntityRegistry,
    integrations: DashMap<String, Arc<dyn Integration>>,
    entities: DashMap<String, PlatformEntity>,
    flows: DashMap<String, ConfigFlowProgress>,
    options_flows: DashMap<String, OptionsFlowProgress>,
}

impl Hass {
    pub fn new(config_dir: impl AsRef<Path>) -> Arc<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        let hass = Arc::new(Self {
            states: StateMachine::new(),
            services: ServiceRegistry::new(),
            config_entries: ConfigEntries::new(Storage::new(&config_dir)),
            device_registry: DeviceRegistry::new(),
            entity_registry: EntityRegistry::new(),
            integrations: DashMap::new(),
            entities: DashMap::new(),
            flows: DashMap::new(),
            options_flows: DashMap::new(),
            config_dir,
        });
        hass.register_switch_services();
        hass
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn register_integration(&self, integration: Arc<dyn Integration>) {
        info!("Registered integration: {}", integration.domain());
        self.integrations
            .insert(integration.domain().to_string(), integration);
    }

    fn integration(&self, domain: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(domain).map(|i| Arc::clone(i.value()))
    }

    // Entity platform

    /// Register entities of a config entry and write their initial states
    pub fn add_entities(&self, entry: &ConfigEntry, entities: Vec<Arc<dyn Entity>>) {
        for entity in entities {
            let device_id = entity
                .device_info()
                .filter(|info| !info.identifiers.is_empty() || !info.connections.is_empty())
                .map(|info| {
                    self.device_registry
                        .get_or_create(&entry.entry_id, &info)
                        .id
                        .clone()
                });

            let unique_id = entity.unique_id();
            let name = friendly_name(entity.as_ref());
            let registered = self.entity_registry.get_or_create(EntityRegistration {
                domain: entity.domain(),
                platform: &entry.domain,
                unique_id: &unique_id,
                suggested_name: name.as_deref(),
                config_entry_id: Some(&entry.entry_id),
                device_id: device_id.as_deref(),
                entity_category: entity.entity_category(),
            });

            let platform_entity = PlatformEntity {
                entity_id: registered.entity_id.clone(),
                config_entry_id: entry.entry_id.clone(),
                entity,
            };
            self.write_state(&platform_entity);
            self.entities
                .insert(registered.entity_id.to_string(), platform_entity);
        }
    }

    fn write_state(&self, platform_entity: &PlatformEntity) {
        let (state, attributes) = render_state(platform_entity.entity.as_ref());
        self.states.set(
            platform_entity.entity_id.clone(),
            state,
            attributes,
            Context::new(),
        );
    }

    /// Re-render every entity of a config entry
    pub fn write_entity_states(&self, config_entry_id: &str) {
        for platform_entity in self.entities_for_entry(config_entry_id) {
            self.write_state(&platform_entity);
        }
    }

    pub fn entity(&self, entity_id: &str) -> Option<PlatformEntity> {
        self.entities.get(entity_id).map(|e| e.value().clone())
    }

    /// Entities added for a config entry, sorted by entity_id
    pub fn entities_for_entry(&self, config_entry_id: &str) -> Vec<PlatformEntity> {
        let mut entities: Vec<PlatformEntity> = self
            .entities
            .iter()
            .filter(|e| e.config_entry_id == config_entry_id)
            .map(|e| e.value().clone())
            .collect();
        entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        entities
    }

    /// Drop an entity from the platform and the state machine
    pub fn remove_entity(&self, entity_id: &str) {
        if let Some((_, platform_entity)) = self.entities.remove(entity_id) {
            self.states.remove(&platform_entity.entity_id);
            debug!("Removed entity {} from platform", entity_id);
        }
    }

    fn remove_entities_for_entry(&self, config_entry_id: &str) {
        for platform_entity in self.entities_for_entry(config_entry_id) {
            self.remove_entity(&platform_entity.entity_id.to_string());
        }
    }

    /// Remove a device and the registered entities of `platform` attached to it
    pub fn remove_device(&self, device_id: &str, platform: &str) {
        for entry in self.entity_registry.get_by_device_id(device_id) {
            if entry.platform == platform {
                let entity_id = entry.entity_id.to_string();
                self.remove_entity(&entity_id);
                self.entity_registry.remove(&entity_id);
            }
        }
        self.device_registry.remove(device_id);
    }

    fn register_switch_services(self: &Arc<Self>) {
        for service in [SERVICE_TURN_ON, SERVICE_TURN_OFF, SERVICE_TOGGLE] {
            let weak = Arc::downgrade(self);
            self.services
                .register(SWITCH_DOMAIN, service, move |call: ServiceCall| {
                    let weak = Weak::clone(&weak);
                    async move {
                        let hass = weak
                            .upgrade()
                            .ok_or_else(|| ServiceError::CallFailed("host stopped".into()))?;
                        hass.handle_switch_call(call).await
                    }
                });
        }
    }

    #[instrument(skip(self, call), fields(service = %call.service))]
    async fn handle_switch_call(&self, call: ServiceCall) -> Result<(), ServiceError> {
        let entity_ids = call.target_entity_ids();
        if entity_ids.is_empty() {
            return Err(ServiceError::InvalidData("entity_id is required".into()));
        }

        for entity_id in entity_ids {
            let platform_entity = self
                .entity(&entity_id)
                .ok_or_else(|| ServiceError::InvalidData(format!("unknown entity {}", entity_id)))?;
            let switch = platform_entity
                .entity
                .as_switch()
                .ok_or_else(|| ServiceError::InvalidData(format!("{} is not a switch", entity_id)))?;

            match call.service.as_str() {
                SERVICE_TURN_ON => switch.turn_on().await,
                SERVICE_TURN_OFF => switch.turn_off().await,
                _ => {
                    if switch.is_on() == Some(true) {
                        switch.turn_off().await
                    } else {
                        switch.turn_on().await
                    }
                }
            }
        }
        Ok(())
    }

    // Config entry lifecycle

    #[instrument(skip(self))]
    pub async fn setup_entry(self: &Arc<Self>, entry_id: &str) -> HassResult<()> {
        let entry = self
            .config_entries
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.is_ignored() {
            debug!("Skipping setup of ignored entry {}", entry_id);
            return Ok(());
        }
        if matches!(
            entry.state,
            ConfigEntryState::Loaded | ConfigEntryState::SetupInProgress
        ) {
            debug!("Entry {} is already {:?}", entry_id, entry.state);
            return Ok(());
        }

        let integration = self
            .integration(&entry.domain)
            .ok_or_else(|| HassError::UnknownIntegration(entry.domain.clone()))?;

        self.config_entries
            .set_state(entry_id, ConfigEntryState::SetupInProgress, None);

        match integration.setup_entry(self, &entry).await {
            Ok(()) => {
                self.config_entries
                    .set_state(entry_id, ConfigEntryState::Loaded, None);
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(SetupError::NotReady(reason)) => {
                warn!("Entry {} not ready: {}", entry.title, reason);
                self.config_entries.set_state(
                    entry_id,
                    ConfigEntryState::SetupRetry,
                    Some(reason.clone()),
                );
                Err(SetupError::NotReady(reason).into())
            }
            Err(err) => {
                error!("Setup failed for entry {}: {}", entry.title, err);
                self.config_entries.set_state(
                    entry_id,
                    ConfigEntryState::SetupError,
                    Some(err.to_string()),
                );
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn unload_entry(self: &Arc<Self>, entry_id: &str) -> HassResult<()> {
        let entry = self
            .config_entries
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state).into());
        }
        if entry.state != ConfigEntryState::Loaded {
            self.config_entries
                .set_state(entry_id, ConfigEntryState::NotLoaded, None);
            return Ok(());
        }

        let integration = self
            .integration(&entry.domain)
            .ok_or_else(|| HassError::UnknownIntegration(entry.domain.clone()))?;

        self.config_entries
            .set_state(entry_id, ConfigEntryState::UnloadInProgress, None);

        if integration.unload_entry(self, &entry).await {
            self.remove_entities_for_entry(entry_id);
            self.config_entries
                .set_state(entry_id, ConfigEntryState::NotLoaded, None);
            info!("Unloaded entry: {} ({})", entry.title, entry_id);
            Ok(())
        } else {
            self.config_entries
                .set_state(entry_id, ConfigEntryState::FailedUnload, None);
            Err(HassError::UnloadFailed(entry_id.to_string()))
        }
    }

    pub async fn reload_entry(self: &Arc<Self>, entry_id: &str) -> HassResult<()> {
        self.unload_entry(entry_id).await?;
        self.setup_entry(entry_id).await
    }

    /// Unload, delete, then let the integration clean up after the entry
    #[instrument(skip(self))]
    pub async fn remove_entry(self: &Arc<Self>, entry_id: &str) -> HassResult<()> {
        let entry = self
            .config_entries
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state == ConfigEntryState::Loaded {
            if let Err(err) = self.unload_entry(entry_id).await {
                warn!("Unload before removal of {} failed: {}", entry_id, err);
            }
        }

        let entry = self.config_entries.remove(entry_id).await?;

        if let Some(integration) = self.integration(&entry.domain) {
            integration.remove_entry(self, &entry).await;
        }

        for registered in self.entity_registry.get_by_config_entry_id(entry_id) {
            let entity_id = registered.entity_id.to_string();
            self.remove_entity(&entity_id);
            self.entity_registry.remove(&entity_id);
        }
        for device in self.device_registry.get_by_config_entry_id(entry_id) {
            if device.config_entries.iter().all(|id| id == entry_id) {
                self.remove_device(&device.id, &entry.domain);
            }
        }
        Ok(())
    }

    /// Set up every stored entry that is not ignored
    pub async fn setup_all(self: &Arc<Self>) {
        for entry in self.config_entries.all() {
            if entry.is_ignored() {
                continue;
            }
            if let Err(err) = self.setup_entry(&entry.entry_id).await {
                warn!("Entry {} ({}) did not load: {}", entry.title, entry.entry_id, err);
            }
        }
    }

    pub async fn unload_all(self: &Arc<Self>) {
        for entry in self.config_entries.all() {
            if entry.state == ConfigEntryState::Loaded {
                if let Err(err) = self.unload_entry(&entry.entry_id).await {
                    warn!("Failed to unload {}: {}", entry.entry_id, err);
                }
            }
        }
    }

    // Config flows

    /// Start a config flow for `domain`; the first step is named after the source
    #[instrument(skip(self, data))]
    pub async fn flow_init(
        self: &Arc<Self>,
        domain: &str,
        source: ConfigEntrySource,
        data: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let integration = self
            .integration(domain)
            .ok_or_else(|| FlowError::UnknownHandler(domain.to_string()))?;

        let step_id = source.as_str().to_string();
        let progress = ConfigFlowProgress {
            flow_id: ulid::Ulid::new().to_string(),
            handler: domain.to_string(),
            source,
            step_id: step_id.clone(),
            flow: integration.config_flow(),
            last_result: FlowResult::form(step_id),
        };
        debug!("Starting {} flow {}", domain, progress.flow_id);
        self.run_flow_step(progress, data).await
    }

    /// Submit input to the current step of a flow
    #[instrument(skip(self, user_input))]
    pub async fn flow_configure(
        self: &Arc<Self>,
        flow_id: &str,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let (_, progress) = self
            .flows
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        self.run_flow_step(progress, user_input).await
    }

    /// Last result of every flow waiting for input
    pub fn flows_in_progress(&self) -> Vec<FlowResult> {
        let mut results: Vec<FlowResult> = self
            .flows
            .iter()
            .map(|f| f.last_result.clone())
            .collect();
        results.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        results
    }

    pub fn abort_flow(&self, flow_id: &str) -> bool {
        self.flows.remove(flow_id).is_some()
    }

    fn other_flow_claims(&self, handler: &str, flow_id: &str, unique_id: &str) -> bool {
        self.flows.iter().any(|f| {
            f.flow_id != flow_id && f.handler == handler && f.flow.unique_id() == Some(unique_id)
        })
    }

    fn abort_flows_claiming(&self, handler: &str, unique_id: &str) {
        self.flows.retain(|_, f| {
            !(f.handler == handler && f.flow.unique_id() == Some(unique_id))
        });
    }

    async fn run_flow_step(
        self: &Arc<Self>,
        mut progress: ConfigFlowProgress,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let mut result = progress
            .flow
            .async_step(self, &progress.step_id, user_input)
            .await?;
        result.flow_id = progress.flow_id.clone();
        result.handler = progress.handler.clone();

        match result.result_type {
            FlowResultType::Form => {
                if let Some(unique_id) = progress.flow.unique_id() {
                    if self.other_flow_claims(&progress.handler, &progress.flow_id, unique_id) {
                        debug!("Flow for {} already in progress", unique_id);
                        let mut aborted = FlowResult::abort("already_in_progress");
                        aborted.flow_id = progress.flow_id.clone();
                        aborted.handler = progress.handler.clone();
                        return Ok(aborted);
                    }
                }
                if let Some(step_id) = &result.step_id {
                    progress.step_id = step_id.clone();
                }
                progress.last_result = result.clone();
                self.flows.insert(progress.flow_id.clone(), progress);
            }
            FlowResultType::CreateEntry => {
                let mut entry = ConfigEntry::new(
                    progress.handler.as_str(),
                    result.title.clone().unwrap_or_default(),
                )
                .with_data(result.data.clone())
                .with_source(progress.source.clone());
                if let Some(unique_id) = progress.flow.unique_id() {
                    entry = entry.with_unique_id(unique_id);
                }

                let entry = match self.config_entries.add(entry).await {
                    Ok(entry) => entry,
                    Err(ConfigEntriesError::AlreadyExists { .. }) => {
                        let mut aborted = FlowResult::abort("already_configured");
                        aborted.flow_id = progress.flow_id.clone();
                        aborted.handler = progress.handler.clone();
                        return Ok(aborted);
                    }
                    Err(err) => return Err(err.into()),
                };
                result.entry_id = Some(entry.entry_id.clone());

                if let Some(unique_id) = &entry.unique_id {
                    self.abort_flows_claiming(&entry.domain, unique_id);
                }
                if !entry.is_ignored() {
                    if let Err(err) = self.setup_entry(&entry.entry_id).await {
                        warn!("Entry {} created but not loaded: {}", entry.entry_id, err);
                    }
                }
            }
            FlowResultType::Abort => {
                debug!(
                    "Flow {} aborted: {}",
                    progress.flow_id,
                    result.reason.as_deref().unwrap_or("")
                );
            }
        }
        Ok(result)
    }

    // Options flows

    pub async fn options_flow_init(
        self: &Arc<Self>,
        entry_id: &str,
    ) -> Result<FlowResult, FlowError> {
        let entry = self
            .config_entries
            .get(entry_id)
            .ok_or_else(|| FlowError::EntryNotFound(entry_id.to_string()))?;
        let integration = self
            .integration(&entry.domain)
            .ok_or_else(|| FlowError::UnknownHandler(entry.domain.clone()))?;
        let flow = integration
            .options_flow(&entry)
            .ok_or_else(|| FlowError::NoOptionsFlow(entry.domain.clone()))?;

        let progress = OptionsFlowProgress {
            entry_id: entry_id.to_string(),
            step_id: "init".to_string(),
            flow,
        };
        self.run_options_step(ulid::Ulid::new().to_string(), progress, None)
            .await
    }

    pub async fn options_flow_configure(
        self: &Arc<Self>,
        flow_id: &str,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let (_, progress) = self
            .options_flows
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        self.run_options_step(flow_id.to_string(), progress, user_input)
            .await
    }

    async fn run_options_step(
        self: &Arc<Self>,
        flow_id: String,
        mut progress: OptionsFlowProgress,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let entry = self
            .config_entries
            .get(&progress.entry_id)
            .ok_or_else(|| FlowError::EntryNotFound(progress.entry_id.clone()))?;

        let mut result = progress
            .flow
            .async_step(self, &entry, &progress.step_id, user_input)
            .await?;
        result.flow_id = flow_id.clone();
        result.handler = entry.entry_id.clone();

        match result.result_type {
            FlowResultType::Form => {
                if let Some(step_id) = &result.step_id {
                    progress.step_id = step_id.clone();
                }
                self.options_flows.insert(flow_id, progress);
            }
            FlowResultType::CreateEntry => {
                let options: HashMap<String, serde_json::Value> = result.data.clone();
                self.config_entries
                    .update(&entry.entry_id, ConfigEntryUpdate::new().options(options))
                    .await?;
                info!("Updated options of entry {}", entry.entry_id);
                if entry.state == ConfigEntryState::Loaded {
                    if let Err(err) = self.reload_entry(&entry.entry_id).await {
                        warn!("Reload of {} after options change failed: {}", entry.entry_id, err);
                    }
                }
            }
            FlowResultType::Abort => {}
        }
        Ok(result)
    }
}
