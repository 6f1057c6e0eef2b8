//! Entity states and the state machine that holds them
//!
//! The state machine is the host's view of every entity the integration
//! exposes. Each write broadcasts a [`StateChanged`] notification so tests and
//! the server can observe refreshes without polling.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::{Context, EntityId};

/// State value for entities whose data source is unreachable
pub const STATE_UNAVAILABLE: &str = "unavailable";
/// State value for entities that have no value yet
pub const STATE_UNKNOWN: &str = "unknown";
/// Maximum length of a state value
pub const MAX_STATE_LENGTH: usize = 255;

const CHANNEL_CAPACITY: usize = 256;

/// The state of an entity at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: EntityId,

    /// The state value (e.g. "on", "-61", "connected", "unavailable")
    pub state: String,

    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the state value last changed
    pub last_changed: DateTime<Utc>,

    /// When the state or attributes were last written
    pub last_updated: DateTime<Utc>,

    pub context: Context,
}

impl State {
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: truncate_state(state.into()),
            attributes,
            last_changed: now,
            last_updated: now,
            context,
        }
    }

    /// Create an updated state, preserving `last_changed` if the value is the same
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        let new_state = truncate_state(new_state.into());
        let changed = self.state != new_state;

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed: if changed { now } else { self.last_changed },
            last_updated: now,
            context,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    /// Get an attribute value by key
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

fn truncate_state(value: String) -> String {
    if value.chars().count() > MAX_STATE_LENGTH {
        STATE_UNKNOWN.to_string()
    } else {
        value
    }
}

/// Notification sent for every state write or removal
#[derive(Debug, Clone)]
pub struct StateChanged {
    pub entity_id: EntityId,
    pub old_state: Option<State>,
    pub new_state: Option<State>,
}

/// Current state of every entity, keyed by entity_id string
pub struct StateMachine {
    states: DashMap<String, State>,
    changes: broadcast::Sender<StateChanged>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            states: DashMap::new(),
            changes,
        }
    }

    /// Write the state of an entity
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let key = entity_id.to_string();
        let old_state = self.states.get(&key).map(|s| s.clone());

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context),
            None => State::new(entity_id.clone(), state, attributes, context),
        };

        debug!(state = %new_state.state, "Setting entity state");
        self.states.insert(key, new_state.clone());

        // No receivers is fine
        let _ = self.changes.send(StateChanged {
            entity_id,
            old_state,
            new_state: Some(new_state.clone()),
        });

        new_state
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the state value, or None if the entity doesn't exist
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    /// All entity IDs of a domain, sorted
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .states
            .iter()
            .filter(|r| r.value().entity_id.domain() == domain)
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Remove an entity's state
    #[instrument(skip(self), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId) -> Option<State> {
        let old_state = self.states.remove(&entity_id.to_string()).map(|(_, s)| s);
        if old_state.is_some() {
            let _ = self.changes.send(StateChanged {
                entity_id: entity_id.clone(),
                old_state: old_state.clone(),
                new_state: None,
            });
        }
        old_state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.changes.subscribe()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
