//! Device registry
//!
//! Tracks physical devices with their identifiers, MAC connections and the
//! config entries that reference them. Lookups by identifier, connection and
//! config entry are indexed.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const CONNECTION_NETWORK_MAC: &str = "mac";

/// A device identifier (domain, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// A device connection (type, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceConnection(pub String, pub String);

impl DeviceConnection {
    pub fn new(conn_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self(conn_type.into(), id.into())
    }

    pub fn connection_type(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    /// MAC connections are stored in `format_mac` form
    pub fn normalized(&self) -> Self {
        if self.0 == CONNECTION_NETWORK_MAC {
            Self(self.0.clone(), format_mac(&self.1))
        } else {
            self.clone()
        }
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// Normalise a MAC address to lowercase colon-separated form
///
/// Accepts `aa:bb:..`, `aa-bb-..`, `aabb.ccdd.eeff` and bare 12-digit hex.
/// Anything else (Autobayt device ids that are not MACs, for one) is
/// returned unchanged.
pub fn format_mac(mac: &str) -> String {
    let count = |sep: char| mac.chars().filter(|c| *c == sep).count();

    let stripped = if mac.len() == 17 && count(':') == 5 {
        return mac.to_lowercase();
    } else if mac.len() == 17 && count('-') == 5 {
        mac.replace('-', "")
    } else if mac.len() == 14 && count('.') == 2 {
        mac.replace('.', "")
    } else if mac.len() == 12 && mac.chars().all(|c| c.is_ascii_hexdigit()) {
        mac.to_string()
    } else {
        return mac.to_string();
    };

    if !stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return mac.to_string();
    }

    stripped
        .to_lowercase()
        .as_bytes()
        .chunks(2)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// What an entity knows about the device it belongs to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<DeviceIdentifier>,
    pub connections: Vec<DeviceConnection>,
    pub manufacturer: Option<String>,
    pub name: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    /// Identifier of the parent device (hub)
    pub via_device: Option<DeviceIdentifier>,
}

/// A registered device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal UUID
    pub id: String,
    pub identifiers: Vec<DeviceIdentifier>,
    pub connections: Vec<DeviceConnection>,
    pub config_entries: Vec<String>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    /// Registry id of the parent device
    pub via_device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            identifiers: Vec::new(),
            connections: Vec::new(),
            config_entries: Vec::new(),
            name: None,
            manufacturer: None,
            model: None,
            sw_version: None,
            via_device_id: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Check whether the device has an identifier in `domain`
    pub fn has_identifier_domain(&self, domain: &str) -> bool {
        self.identifiers.iter().any(|i| i.domain() == domain)
    }
}

/// Fields to change on an existing device
#[derive(Debug, Default)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub sw_version: Option<String>,
    pub model: Option<String>,
}

/// Device registry
///
/// Entries are stored as `Arc<DeviceEntry>` to avoid cloning on reads.
pub struct DeviceRegistry {
    /// Primary index: device_id -> DeviceEntry
    by_id: DashMap<String, Arc<DeviceEntry>>,

    /// Index: identifier key -> device_id
    by_identifier: DashMap<String, String>,

    /// Index: connection key -> device_id
    by_connection: DashMap<String, String>,

    /// Index: config_entry_id -> set of device_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_identifier: DashMap::new(),
            by_connection: DashMap::new(),
            by_config_entry_id: DashMap::new(),
        }
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        let device_id = entry.id.clone();
        for identifier in &entry.identifiers {
            self.by_identifier.insert(identifier.key(), device_id.clone());
        }
        for connection in &entry.connections {
            self.by_connection.insert(connection.key(), device_id.clone());
        }
        for config_entry_id in &entry.config_entries {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(device_id.clone());
        }
        self.by_id.insert(device_id, entry);
    }

    fn unindex_entry(&self, entry: &DeviceEntry) {
        for identifier in &entry.identifiers {
            self.by_identifier.remove(&identifier.key());
        }
        for connection in &entry.connections {
            self.by_connection.remove(&connection.key());
        }
        for config_entry_id in &entry.config_entries {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entry.id);
            }
        }
        self.by_id.remove(&entry.id);
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_identifier
            .get(&DeviceIdentifier::new(domain, id).key())
            .and_then(|device_id| self.get(&device_id))
    }

    pub fn get_by_connection(&self, conn_type: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        let key = DeviceConnection::new(conn_type, id).normalized().key();
        self.by_connection
            .get(&key)
            .and_then(|device_id| self.get(&device_id))
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Every registered device
    pub fn devices(&self) -> Vec<Arc<DeviceEntry>> {
        let mut devices: Vec<Arc<DeviceEntry>> =
            self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        devices.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        devices
    }

    fn find(&self, info: &DeviceInfo, connections: &[DeviceConnection]) -> Option<Arc<DeviceEntry>> {
        info.identifiers
            .iter()
            .find_map(|i| self.get_by_identifier(i.domain(), i.id()))
            .or_else(|| {
                connections
                    .iter()
                    .find_map(|c| self.get_by_connection(c.connection_type(), c.id()))
            })
    }

    /// Get or create a device for a config entry
    ///
    /// An existing device is matched by identifier first, then by connection.
    /// Its identifier, connection and config entry sets are merged and any
    /// metadata present in `info` overwrites the stored value.
    pub fn get_or_create(&self, config_entry_id: &str, info: &DeviceInfo) -> Arc<DeviceEntry> {
        let connections: Vec<DeviceConnection> =
            info.connections.iter().map(DeviceConnection::normalized).collect();

        let via_device_id = info
            .via_device
            .as_ref()
            .and_then(|via| self.get_by_identifier(via.domain(), via.id()))
            .map(|d| d.id.clone());

        let mut entry = match self.find(info, &connections) {
            Some(existing) => {
                debug!("Found existing device: {}", existing.id);
                self.unindex_entry(&existing);
                (*existing).clone()
            }
            None => DeviceEntry::new(),
        };

        for identifier in &info.identifiers {
            if !entry.identifiers.contains(identifier) {
                entry.identifiers.push(identifier.clone());
            }
        }
        for connection in connections {
            if !entry.connections.contains(&connection) {
                entry.connections.push(connection);
            }
        }
        if !entry.config_entries.iter().any(|id| id == config_entry_id) {
            entry.config_entries.push(config_entry_id.to_string());
        }
        if info.name.is_some() {
            entry.name = info.name.clone();
        }
        if info.manufacturer.is_some() {
            entry.manufacturer = info.manufacturer.clone();
        }
        if info.model.is_some() {
            entry.model = info.model.clone();
        }
        if info.sw_version.is_some() {
            entry.sw_version = info.sw_version.clone();
        }
        if via_device_id.is_some() {
            entry.via_device_id = via_device_id;
        }
        entry.modified_at = Utc::now();

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        entry
    }

    /// Apply an update, `None` if the device is unknown
    pub fn update(&self, device_id: &str, update: DeviceUpdate) -> Option<Arc<DeviceEntry>> {
        let existing = self.get(device_id)?;
        let mut entry = (*existing).clone();

        if let Some(name) = update.name {
            entry.name = Some(name);
        }
        if let Some(sw_version) = update.sw_version {
            entry.sw_version = Some(sw_version);
        }
        if let Some(model) = update.model {
            entry.model = Some(model);
        }
        entry.modified_at = Utc::now();

        let entry = Arc::new(entry);
        self.by_id.insert(device_id.to_string(), Arc::clone(&entry));
        debug!("Updated device: {}", device_id);
        Some(entry)
    }

    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let entry = self.get(device_id)?;
        self.unindex_entry(&entry);
        info!("Removed device: {} ({:?})", device_id, entry.name);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
