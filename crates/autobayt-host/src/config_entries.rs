//! Config entries
//!
//! A config entry is one configured instance of an integration: an Autobayt
//! account or a single confirmed device. Entries are persisted under
//! `.storage/core.config_entries`; their lifecycle state lives in memory.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::{Storage, StorageError, StorageFile};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    SetupInProgress,
    Loaded,
    /// Setup failed permanently
    SetupError,
    /// Setup failed because the remote side was not ready
    SetupRetry,
    UnloadInProgress,
    FailedUnload,
}

impl ConfigEntryState {
    /// Check if the entry can be unloaded/reloaded from this state
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConfigEntryState::Loaded
                | ConfigEntryState::SetupError
                | ConfigEntryState::SetupRetry
                | ConfigEntryState::NotLoaded
        )
    }
}

/// How the entry was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    #[default]
    User,
    Discovery,
    /// User hid a discovered device
    Ignore,
    /// Created from server configuration
    Import,
}

impl ConfigEntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigEntrySource::User => "user",
            ConfigEntrySource::Discovery => "discovery",
            ConfigEntrySource::Ignore => "ignore",
            ConfigEntrySource::Import => "import",
        }
    }
}

/// A configuration entry for an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    pub domain: String,

    /// Human-readable display name
    pub title: String,

    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,

    /// Used to prevent duplicate entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default)]
    pub source: ConfigEntrySource,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: ConfigEntryState,

    /// Explanation for failed states (not persisted)
    #[serde(skip, default)]
    pub reason: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
            unique_id: None,
            source: ConfigEntrySource::User,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.options = options;
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    pub fn is_ignored(&self) -> bool {
        self.source == ConfigEntrySource::Ignore
    }

    /// String value from `data`
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Boolean option, `default` when unset or not a bool
    pub fn option_bool(&self, key: &str, default: bool) -> bool {
        self.options
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }
}

/// Partial update of a config entry
#[derive(Debug, Default)]
pub struct ConfigEntryUpdate {
    pub title: Option<String>,
    pub data: Option<HashMap<String, serde_json::Value>>,
    pub options: Option<HashMap<String, serde_json::Value>>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.options = Some(options);
        self
    }
}

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigEntriesData {
    entries: Vec<ConfigEntry>,
}

/// Config entry store with domain and unique_id indexes
pub struct ConfigEntries {
    storage: Storage,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,
}

impl ConfigEntries {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> ConfigEntriesResult<()> {
        if let Some(storage_file) = self.storage.load::<ConfigEntriesData>(STORAGE_KEY).await? {
            info!(
                "Loading {} config entries from storage",
                storage_file.data.entries.len()
            );
            for entry in storage_file.data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    async fn save(&self) -> ConfigEntriesResult<()> {
        let mut entries: Vec<ConfigEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let storage_file = StorageFile::new(
            STORAGE_KEY,
            ConfigEntriesData { entries },
            STORAGE_VERSION,
            STORAGE_MINOR_VERSION,
        );
        self.storage.save(&storage_file).await?;
        debug!("Saved {} config entries to storage", self.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();
        self.entries.insert(entry_id.clone(), entry.clone());
        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }
        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// All entries of a domain, oldest first
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = self
            .by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    pub fn all(&self) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    /// Add a new entry, rejecting a duplicate unique_id within the domain
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some(title) = update.title {
            entry.title = title;
        }
        if let Some(data) = update.data {
            entry.data = data;
        }
        if let Some(options) = update.options {
            entry.options = options;
        }
        entry.modified_at = Utc::now();

        self.entries.insert(entry_id.to_string(), entry.clone());
        self.save().await?;

        debug!("Updated config entry: {}", entry_id);
        Ok(entry)
    }

    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.unindex_entry(&entry);
        self.save().await?;

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );
        Ok(entry)
    }

    pub fn set_state(&self, entry_id: &str, state: ConfigEntryState, reason: Option<String>) {
        if let Some(mut entry) = self.entries.get_mut(entry_id) {
            entry.state = state;
            entry.reason = reason;
            debug!("Entry {} state changed to {:?}", entry_id, state);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
