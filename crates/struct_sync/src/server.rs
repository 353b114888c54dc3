//! StructSync Server
//!
//! Registry of controllers by full id plus the sessions that receive their
//! updates. Fan-out visits sessions one after another; a failing session
//! reports on its own error stream and never stops delivery to the rest.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use struct_types::Mutation;
use uuid::Uuid;

use crate::session::SessionInner;
use crate::{
    BatchAction, Controller, EventMessage, ProxyMessage, ServerMiddleware, StructSyncSession,
    SyncError, SyncResult,
};

#[derive(Clone)]
pub struct StructSyncServer {
    inner: Arc<ServerInner>,
}

pub(crate) struct ServerInner {
    /// Registered controllers by full id
    controllers: DashMap<String, Controller>,

    /// Attached sessions; dropped sessions are pruned on fan-out
    sessions: DashMap<Uuid, Weak<SessionInner>>,

    middleware: RwLock<Vec<Arc<dyn ServerMiddleware>>>,
}

impl Default for StructSyncServer {
    fn default() -> Self {
        Self::new()
    }
}

impl StructSyncServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                controllers: DashMap::new(),
                sessions: DashMap::new(),
                middleware: RwLock::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ServerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ServerInner> {
        Arc::downgrade(&self.inner)
    }

    /// Append a middleware to the chain
    pub fn use_middleware(&self, middleware: Arc<dyn ServerMiddleware>) {
        self.inner.middleware.write().push(middleware);
    }

    pub(crate) fn middleware(&self) -> Vec<Arc<dyn ServerMiddleware>> {
        self.inner.middleware.read().clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Controllers
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn register(&self, controller: &Controller) -> SyncResult<()> {
        match self.inner.controllers.entry(controller.full_id().to_string()) {
            Entry::Occupied(entry) => Err(SyncError::DuplicateController(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(controller.clone());
                tracing::debug!(controller = %controller.full_id(), "Registered controller");
                Ok(())
            }
        }
    }

    pub(crate) fn unregister(&self, full_id: &str) -> Option<Controller> {
        let removed = self.inner.controllers.remove(full_id).map(|(_, c)| c);
        if removed.is_some() {
            tracing::debug!(controller = %full_id, "Unregistered controller");
        }
        removed
    }

    pub fn find(&self, full_id: &str) -> SyncResult<Controller> {
        self.inner
            .controllers
            .get(full_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| SyncError::ControllerNotFound(full_id.to_string()))
    }

    pub fn controller_count(&self) -> usize {
        self.inner.controllers.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn attach_session(&self, id: Uuid, session: Weak<SessionInner>) {
        self.inner.sessions.insert(id, session);
        tracing::info!(session = %id, "Session attached");
    }

    pub(crate) fn detach_session(&self, id: Uuid) {
        if self.inner.sessions.remove(&id).is_some() {
            tracing::info!(session = %id, "Session detached");
        }
    }

    /// Live sessions in no particular order
    pub fn sessions(&self) -> Vec<StructSyncSession> {
        self.inner.sessions.retain(|_, session| session.strong_count() > 0);
        self.inner
            .sessions
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .map(StructSyncSession::from_inner)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Fan-out
    // ─────────────────────────────────────────────────────────────────────

    /// Deliver one batch holding every edit of a `mutate` call
    pub async fn notify_mutation(&self, target: &str, mutations: &[Mutation]) -> SyncResult<()> {
        let actions = mutations
            .iter()
            .map(|m| m.to_message().map(BatchAction::Mutation))
            .collect::<Result<Vec<_>, _>>()?;
        self.broadcast(ProxyMessage::Batch {
            id: target.to_string(),
            actions,
        })
        .await;
        Ok(())
    }

    pub async fn emit_event(&self, target: &str, event: &str, value: JsonValue) -> SyncResult<()> {
        self.broadcast(ProxyMessage::Batch {
            id: target.to_string(),
            actions: vec![BatchAction::Event(EventMessage {
                event: event.to_string(),
                value,
            })],
        })
        .await;
        Ok(())
    }

    async fn broadcast(&self, message: ProxyMessage) {
        for session in self.sessions() {
            session.deliver(&message).await;
        }
    }
}
