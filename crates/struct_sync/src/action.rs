//! Action, Event and Meta Message Types

use std::future::Future;

use serde_json::Value as JsonValue;
use struct_types::{Type, Value};

use crate::{ControllerRequest, SyncResult};

/// Remote call declared on a contract
#[derive(Debug, Clone)]
pub struct ActionType {
    name: String,
    argument: Type,
    result: Type,
}

impl ActionType {
    pub fn define(name: impl Into<String>, argument: Type, result: Type) -> Self {
        Self {
            name: name.into(),
            argument,
            result,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn argument(&self) -> &Type {
        &self.argument
    }

    pub fn result(&self) -> &Type {
        &self.result
    }
}

/// Server-pushed notification declared on a contract
#[derive(Debug, Clone)]
pub struct EventType {
    name: String,
    result: Type,
}

impl EventType {
    pub fn define(name: impl Into<String>, result: Type) -> Self {
        Self {
            name: name.into(),
            result,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn result(&self) -> &Type {
        &self.result
    }
}

/// Typed out-of-band request answered by server middleware
#[derive(Debug, Clone)]
pub struct MetaMessageType {
    name: String,
    argument: Type,
    result: Type,
}

impl MetaMessageType {
    pub fn new(name: impl Into<String>, argument: Type, result: Type) -> Self {
        Self {
            name: name.into(),
            argument,
            result,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn argument(&self) -> &Type {
        &self.argument
    }

    pub fn result(&self) -> &Type {
        &self.result
    }

    /// Whether a request is a meta message of this type
    pub fn matches(&self, request: &ControllerRequest) -> bool {
        matches!(request, ControllerRequest::Meta { name, .. } if *name == self.name)
    }

    /// Decode the argument, run the callback and encode its result
    pub async fn process<F, Fut>(&self, data: &JsonValue, callback: F) -> SyncResult<JsonValue>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = SyncResult<Value>>,
    {
        let argument = self.argument.deserialize(data)?;
        let result = callback(argument).await?;
        Ok(self.result.serialize(&result)?)
    }
}
