//! Protocol Messages
//!
//! Controller messages travel client to server on [`CONTROLLER_TOPIC`], proxy
//! messages travel server to client on [`PROXY_TOPIC`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use struct_types::MutationMessage;

pub const CONTROLLER_TOPIC: &str = "StructSync:controller_message";
pub const PROXY_TOPIC: &str = "StructSync:proxy_message";

/// Separator between the type name and the instance id in a full id
pub const ID_SEPARATOR: &str = "::";

/// `TypeName` for singletons, `TypeName::id` for instances
pub fn make_full_id(name: &str, id: Option<&str>) -> String {
    match id {
        Some(id) if !id.is_empty() => format!("{name}{ID_SEPARATOR}{id}"),
        _ => name.to_string(),
    }
}

pub fn is_singleton_id(full_id: &str) -> bool {
    !full_id.contains(ID_SEPARATOR)
}

// ─────────────────────────────────────────────────────────────────────────────
// Client -> Server
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerRequest {
    /// Fetch a controller snapshot, optionally tracking it
    Find { target: String, track: bool },

    /// Invoke an action on a controller
    Action {
        target: String,
        action: String,
        argument: JsonValue,
    },

    /// Out-of-band request handled by middleware
    Meta { name: String, data: JsonValue },
}

/// Controller request plus headers for middleware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerMessage {
    #[serde(flatten)]
    pub request: ControllerRequest,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, JsonValue>,
}

impl ControllerMessage {
    pub fn new(request: ControllerRequest) -> Self {
        Self {
            request,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server -> Client
// ─────────────────────────────────────────────────────────────────────────────

/// Event dispatch inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "event")]
pub struct EventMessage {
    pub event: String,
    pub value: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchAction {
    Mutation(MutationMessage),
    Event(EventMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyMessage {
    /// Ordered edits and events for one controller
    Batch {
        id: String,
        actions: Vec<BatchAction>,
    },

    Meta { name: String, data: JsonValue },
}

impl ProxyMessage {
    /// Full id of the controller this message belongs to
    pub fn target(&self) -> Option<&str> {
        match self {
            ProxyMessage::Batch { id, .. } => Some(id),
            ProxyMessage::Meta { .. } => None,
        }
    }
}
