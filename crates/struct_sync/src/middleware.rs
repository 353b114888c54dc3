//! Middleware
//!
//! Interceptors for messages in flight. Outgoing hooks may replace a message;
//! the first replacement wins. Incoming hooks may answer a message themselves;
//! the first answer short-circuits normal dispatch. Returning an error vetoes
//! the message and becomes the error response.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{ControllerMessage, ProxyMessage, StructSyncSession, SyncResult};

/// Context of an inbound controller message
#[derive(Clone)]
pub struct MetaHandle {
    session: Option<StructSyncSession>,
    headers: BTreeMap<String, JsonValue>,
}

impl MetaHandle {
    pub(crate) fn new(session: StructSyncSession, headers: BTreeMap<String, JsonValue>) -> Self {
        Self {
            session: Some(session),
            headers,
        }
    }

    /// Handle for calls made directly on the server side
    pub fn local() -> Self {
        Self {
            session: None,
            headers: BTreeMap::new(),
        }
    }

    /// Session the message arrived on
    pub fn session(&self) -> Option<&StructSyncSession> {
        self.session.as_ref()
    }

    pub fn header(&self, key: &str) -> Option<&JsonValue> {
        self.headers.get(key)
    }

    pub fn headers(&self) -> &BTreeMap<String, JsonValue> {
        &self.headers
    }
}

/// Client side interceptor
#[async_trait]
pub trait ClientMiddleware: Send + Sync {
    async fn on_outgoing(&self, _message: &ControllerMessage) -> SyncResult<Option<ControllerMessage>> {
        Ok(None)
    }

    async fn on_incoming(&self, _message: &ProxyMessage) -> SyncResult<Option<JsonValue>> {
        Ok(None)
    }
}

/// Server side interceptor
#[async_trait]
pub trait ServerMiddleware: Send + Sync {
    async fn on_incoming(
        &self,
        _message: &ControllerMessage,
        _meta: &MetaHandle,
    ) -> SyncResult<Option<JsonValue>> {
        Ok(None)
    }

    async fn on_outgoing(
        &self,
        _message: &ProxyMessage,
        _session: &StructSyncSession,
    ) -> SyncResult<Option<ProxyMessage>> {
        Ok(None)
    }
}
