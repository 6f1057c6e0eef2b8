//! Context type for tracking who caused a state write or service call

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Origin of a state write or service call
///
/// Coordinator refreshes write states under a fresh context; service calls
/// carry the caller's context so the resulting refresh can be traced back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this context (ULID)
    pub id: String,

    /// User that initiated the action, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Parent context ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: None,
            parent_id: None,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
