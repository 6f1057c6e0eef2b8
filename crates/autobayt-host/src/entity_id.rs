//! Entity IDs (`domain.object_id`) and name slugs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity_id must contain exactly one '.' separator")]
    InvalidFormat,

    #[error("domain cannot be empty")]
    EmptyDomain,

    #[error("object_id cannot be empty")]
    EmptyObjectId,

    #[error("'{0}' must be lowercase alphanumeric with underscores")]
    InvalidChars(String),
}

/// An entity ID such as `switch.kitchen_switch_button_1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

impl EntityId {
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();

        if domain.is_empty() {
            return Err(EntityIdError::EmptyDomain);
        }
        if object_id.is_empty() {
            return Err(EntityIdError::EmptyObjectId);
        }
        if !is_valid_part(&domain) || domain.contains("__") {
            return Err(EntityIdError::InvalidChars(domain));
        }
        if !is_valid_part(&object_id) {
            return Err(EntityIdError::InvalidChars(object_id));
        }

        Ok(Self { domain, object_id })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

/// Lowercase alphanumeric + underscore, not starting or ending with `_`
fn is_valid_part(s: &str) -> bool {
    !s.starts_with('_')
        && !s.ends_with('_')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Turn a display name into an object_id
///
/// Runs of anything that is not ASCII alphanumeric collapse into a single `_`.
/// Returns `"unnamed"` when nothing usable is left.
pub fn slugify(name: &str) -> String {
    let mut result = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            result.push(c.to_ascii_lowercase());
        } else if !result.is_empty() && !result.ends_with('_') {
            result.push('_');
        }
    }
    let trimmed = result.trim_end_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => Self::new(domain, object_id),
            _ => Err(EntityIdError::InvalidFormat),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_id() {
        let id: EntityId = "sensor.kitchen_connection".parse().unwrap();
        assert_eq!(id.domain(), "sensor");
        assert_eq!(id.object_id(), "kitchen_connection");
        assert_eq!(id.to_string(), "sensor.kitchen_connection");
    }

    #[test]
    fn test_rejects_invalid_ids() {
        assert_eq!(
            "sensor".parse::<EntityId>(),
            Err(EntityIdError::InvalidFormat)
        );
        assert_eq!(
            "a.b.c".parse::<EntityId>(),
            Err(EntityIdError::InvalidFormat)
        );
        assert!(EntityId::new("Sensor", "x").is_err());
        assert!(EntityId::new("sensor", "_x").is_err());
        assert!(EntityId::new("my__domain", "x").is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Kitchen Switch Button 1"), "kitchen_switch_button_1");
        assert_eq!(slugify("  Living-Room  (Main) "), "living_room_main");
        assert_eq!(slugify("مفتاح"), "unnamed");
    }
}
