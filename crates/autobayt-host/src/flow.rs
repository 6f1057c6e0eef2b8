//! Config and options flows
//!
//! A flow is a small state machine driven one step at a time. Each step
//! returns a [`FlowResult`]: another form to show, an entry to create, or an
//! abort with a reason. [`crate::Hass`] owns the flows in progress and turns
//! `create_entry` results into config entries.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config_entries::{ConfigEntriesError, ConfigEntry};
use crate::Hass;

/// Values submitted for a step
pub type FlowInput = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    Form,
    CreateEntry,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Boolean,
}

/// Form field schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl FormField {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind, default: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: Some(default),
        }
    }
}

/// Result of a flow step
#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    /// Filled in by the flow manager
    pub flow_id: String,
    /// Integration domain, filled in by the flow manager
    pub handler: String,
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub data_schema: Vec<FormField>,
    pub errors: HashMap<String, String>,
    pub description_placeholders: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Entry created from a `create_entry` result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
}

impl FlowResult {
    fn empty(result_type: FlowResultType) -> Self {
        Self {
            flow_id: String::new(),
            handler: String::new(),
            result_type,
            step_id: None,
            data_schema: Vec::new(),
            errors: HashMap::new(),
            description_placeholders: HashMap::new(),
            title: None,
            data: HashMap::new(),
            reason: None,
            entry_id: None,
        }
    }

    pub fn form(step_id: impl Into<String>) -> Self {
        Self {
            step_id: Some(step_id.into()),
            ..Self::empty(FlowResultType::Form)
        }
    }

    pub fn create_entry(title: impl Into<String>, data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            title: Some(title.into()),
            data,
            ..Self::empty(FlowResultType::CreateEntry)
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::empty(FlowResultType::Abort)
        }
    }

    pub fn with_schema(mut self, fields: Vec<FormField>) -> Self {
        self.data_schema = fields;
        self
    }

    pub fn with_errors(mut self, errors: HashMap<String, String>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_placeholders(mut self, placeholders: HashMap<String, String>) -> Self {
        self.description_placeholders = placeholders;
        self
    }

    pub fn is_form(&self) -> bool {
        self.result_type == FlowResultType::Form
    }

    pub fn is_abort(&self) -> bool {
        self.result_type == FlowResultType::Abort
    }

    pub fn is_create_entry(&self) -> bool {
        self.result_type == FlowResultType::CreateEntry
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Integration not found: {0}")]
    UnknownHandler(String),

    #[error("Integration {0} has no options flow")]
    NoOptionsFlow(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),
}

/// A config flow for one integration
///
/// `step_id` is the source (`user`, `discovery`, `ignore`, ...) for the first
/// step and the `step_id` of the last form afterwards.
#[async_trait]
pub trait ConfigFlow: Send + Sync {
    async fn async_step(
        &mut self,
        hass: &Hass,
        step_id: &str,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError>;

    /// Unique id claimed by this flow, stored on the created entry
    fn unique_id(&self) -> Option<&str> {
        None
    }
}

/// An options flow for an existing entry
///
/// The data of a `create_entry` result replaces the entry's options.
#[async_trait]
pub trait OptionsFlow: Send + Sync {
    async fn async_step(
        &mut self,
        hass: &Hass,
        entry: &ConfigEntry,
        step_id: &str,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError>;
}
