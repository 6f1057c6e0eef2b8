//! Entity registry
//!
//! Maps stable `(domain, platform, unique_id)` keys to entity IDs so an
//! entity keeps its ID across reloads, and links entities to their device
//! and config entry.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity_id::slugify;
use crate::EntityId;

/// Entity category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Config,
    Diagnostic,
}

/// A registered entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal UUID
    pub id: String,
    pub entity_id: EntityId,
    pub unique_id: String,
    /// Integration that provides this entity
    pub platform: String,
    pub config_entry_id: Option<String>,
    pub device_id: Option<String>,
    /// Name the entity was registered with
    pub original_name: Option<String>,
    pub entity_category: Option<EntityCategory>,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to register an entity
#[derive(Debug, Clone)]
pub struct EntityRegistration<'a> {
    pub domain: &'a str,
    pub platform: &'a str,
    pub unique_id: &'a str,
    pub suggested_name: Option<&'a str>,
    pub config_entry_id: Option<&'a str>,
    pub device_id: Option<&'a str>,
    pub entity_category: Option<EntityCategory>,
}

type UniqueKey = (String, String, String);

pub struct EntityRegistry {
    /// Primary index: entity_id string -> entry
    by_entity_id: DashMap<String, Arc<EntityEntry>>,

    /// Index: (domain, platform, unique_id) -> entity_id
    by_unique_id: DashMap<UniqueKey, String>,

    /// Index: device_id -> set of entity_ids
    by_device_id: DashMap<String, HashSet<String>>,

    /// Index: config_entry_id -> set of entity_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            by_entity_id: DashMap::new(),
            by_unique_id: DashMap::new(),
            by_device_id: DashMap::new(),
            by_config_entry_id: DashMap::new(),
        }
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.to_string();
        self.by_unique_id.insert(
            (
                entry.entity_id.domain().to_string(),
                entry.platform.clone(),
                entry.unique_id.clone(),
            ),
            entity_id.clone(),
        );
        if let Some(ref device_id) = entry.device_id {
            self.by_device_id
                .entry(device_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }
        if let Some(ref config_entry_id) = entry.config_entry_id {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }
        self.by_entity_id.insert(entity_id, entry);
    }

    fn unindex_entry(&self, entry: &EntityEntry) {
        let entity_id = entry.entity_id.to_string();
        self.by_unique_id.remove(&(
            entry.entity_id.domain().to_string(),
            entry.platform.clone(),
            entry.unique_id.clone(),
        ));
        if let Some(ref device_id) = entry.device_id {
            if let Some(mut ids) = self.by_device_id.get_mut(device_id) {
                ids.remove(&entity_id);
            }
        }
        if let Some(ref config_entry_id) = entry.config_entry_id {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entity_id);
            }
        }
        self.by_entity_id.remove(&entity_id);
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id.get(entity_id).map(|r| Arc::clone(r.value()))
    }

    pub fn get_entity_id(&self, domain: &str, platform: &str, unique_id: &str) -> Option<String> {
        self.by_unique_id
            .get(&(domain.to_string(), platform.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())
    }

    pub fn get_by_device_id(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        self.collect(self.by_device_id.get(device_id).map(|ids| ids.clone()))
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<EntityEntry>> {
        self.collect(
            self.by_config_entry_id
                .get(config_entry_id)
                .map(|ids| ids.clone()),
        )
    }

    fn collect(&self, ids: Option<HashSet<String>>) -> Vec<Arc<EntityEntry>> {
        let mut entries: Vec<Arc<EntityEntry>> = ids
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.get(id))
            .collect();
        entries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        entries
    }

    /// Register an entity, reusing the entity ID of a known unique_id
    pub fn get_or_create(&self, registration: EntityRegistration<'_>) -> Arc<EntityEntry> {
        if let Some(existing) = self
            .get_entity_id(registration.domain, registration.platform, registration.unique_id)
            .and_then(|id| self.get(&id))
        {
            debug!("Found existing entity by unique_id: {}", existing.entity_id);
            if existing.device_id.as_deref() == registration.device_id
                && existing.config_entry_id.as_deref() == registration.config_entry_id
            {
                return existing;
            }
            let mut relinked = (*existing).clone();
            relinked.device_id = registration.device_id.map(String::from);
            relinked.config_entry_id = registration.config_entry_id.map(String::from);
            self.unindex_entry(&existing);
            let relinked = Arc::new(relinked);
            self.index_entry(Arc::clone(&relinked));
            return relinked;
        }

        let object_id = slugify(registration.suggested_name.unwrap_or(registration.unique_id));
        let entity_id = self.generate_entity_id(registration.domain, &object_id);

        let entry = Arc::new(EntityEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            entity_id: entity_id.clone(),
            unique_id: registration.unique_id.to_string(),
            platform: registration.platform.to_string(),
            config_entry_id: registration.config_entry_id.map(String::from),
            device_id: registration.device_id.map(String::from),
            original_name: registration.suggested_name.map(String::from),
            entity_category: registration.entity_category,
            created_at: Utc::now(),
        });
        self.index_entry(Arc::clone(&entry));

        info!("Registered new entity: {}", entity_id);
        entry
    }

    /// First free `domain.object_id`, appending `_2`, `_3`, ... on collision
    fn generate_entity_id(&self, domain: &str, object_id: &str) -> EntityId {
        let mut candidate = object_id.to_string();
        let mut tries = 1;
        loop {
            if let Ok(id) = EntityId::new(domain, candidate.as_str()) {
                if !self.by_entity_id.contains_key(&id.to_string()) {
                    return id;
                }
            }
            tries += 1;
            candidate = format!("{}_{}", object_id, tries);
        }
    }

    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self.get(entity_id)?;
        self.unindex_entry(&entry);
        info!("Removed entity: {}", entity_id);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity_id.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration<'a>(unique_id: &'a str, name: &'a str) -> EntityRegistration<'a> {
        EntityRegistration {
            domain: "sensor",
            platform: "autobayt",
            unique_id,
            suggested_name: Some(name),
            config_entry_id: Some("entry1"),
            device_id: Some("dev1"),
            entity_category: None,
        }
    }

    #[test]
    fn test_entity_id_from_name() {
        let registry = EntityRegistry::new();
        let entry = registry.get_or_create(registration("abc_connection", "Kitchen Connection"));
        assert_eq!(entry.entity_id.to_string(), "sensor.kitchen_connection");
        assert_eq!(
            registry.get_entity_id("sensor", "autobayt", "abc_connection").as_deref(),
            Some("sensor.kitchen_connection")
        );
    }

    #[test]
    fn test_known_unique_id_keeps_entity_id() {
        let registry = EntityRegistry::new();
        let first = registry.get_or_create(registration("abc_connection", "Kitchen Connection"));
        let second = registry.get_or_create(registration("abc_connection", "Renamed"));
        assert_eq!(first.entity_id, second.entity_id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_collision_gets_suffix() {
        let registry = EntityRegistry::new();
        registry.get_or_create(registration("a_connection", "Switch Connection"));
        let second = registry.get_or_create(registration("b_connection", "Switch Connection"));
        let third = registry.get_or_create(registration("c_connection", "Switch Connection"));
        assert_eq!(second.entity_id.to_string(), "sensor.switch_connection_2");
        assert_eq!(third.entity_id.to_string(), "sensor.switch_connection_3");
    }

    #[test]
    fn test_indexes_and_remove() {
        let registry = EntityRegistry::new();
        let entry = registry.get_or_create(registration("abc_firmware", "Kitchen Firmware"));

        assert_eq!(registry.get_by_device_id("dev1").len(), 1);
        assert_eq!(registry.get_by_config_entry_id("entry1").len(), 1);

        registry.remove(&entry.entity_id.to_string()).unwrap();
        assert!(registry.get_by_device_id("dev1").is_empty());
        assert!(registry
            .get_entity_id("sensor", "autobayt", "abc_firmware")
            .is_none());
        assert!(registry.is_empty());
    }
}
