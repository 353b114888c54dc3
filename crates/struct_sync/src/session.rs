//! StructSync Session
//!
//! Server side of one connection. Answers `find`, `action` and `meta`
//! requests arriving on the bridge and forwards update batches for the ids
//! the connected client tracks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::controller::WeakController;
use crate::{
    BridgeError, CONTROLLER_TOPIC, Controller, ControllerMessage, ControllerRequest,
    MessageBridge, MetaHandle, PROXY_TOPIC, ProxyMessage, RequestHandler, StructSyncServer,
    SyncConfig, SyncError, SyncResult, is_singleton_id,
};

#[derive(Clone)]
pub struct StructSyncSession {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    id: Uuid,
    name: String,
    server: StructSyncServer,
    bridge: Arc<dyn MessageBridge>,

    /// Full ids the client asked to track
    tracked: DashSet<String>,

    /// Singletons resolved before the server registry
    default_services: DashMap<String, WeakController>,

    errors: broadcast::Sender<SyncError>,
    closed: AtomicBool,
}

/// Routes bridge requests to a session without keeping it alive
struct SessionHandler {
    session: Weak<SessionInner>,
}

#[async_trait]
impl RequestHandler for SessionHandler {
    async fn handle(&self, topic: &str, payload: JsonValue) -> Result<JsonValue, BridgeError> {
        if topic != CONTROLLER_TOPIC {
            return Err(BridgeError::NoHandler(topic.to_string()));
        }
        let session = self
            .session
            .upgrade()
            .map(StructSyncSession::from_inner)
            .ok_or(BridgeError::Disconnected)?;

        session.handle_message(payload).await.map_err(|e| {
            tracing::debug!(session = %session.id(), error = %e, "Request failed");
            BridgeError::Remote(e.to_string())
        })
    }
}

impl StructSyncSession {
    pub fn new(server: &StructSyncServer, bridge: Arc<dyn MessageBridge>) -> Self {
        Self::with_config(server, bridge, &SyncConfig::default())
    }

    /// Attach a session to `server` and start answering requests on `bridge`
    pub fn with_config(server: &StructSyncServer, bridge: Arc<dyn MessageBridge>, config: &SyncConfig) -> Self {
        let (errors, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4(),
            name: config.session_name.clone(),
            server: server.clone(),
            bridge,
            tracked: DashSet::new(),
            default_services: DashMap::new(),
            errors,
            closed: AtomicBool::new(false),
        });

        inner.bridge.set_request_handler(Arc::new(SessionHandler {
            session: Arc::downgrade(&inner),
        }));
        server.attach_session(inner.id, Arc::downgrade(&inner));

        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn server(&self) -> &StructSyncServer {
        &self.inner.server
    }

    /// Stream of delivery failures for this session
    pub fn subscribe_errors(&self) -> broadcast::Receiver<SyncError> {
        self.inner.errors.subscribe()
    }

    pub fn is_tracking(&self, full_id: &str) -> bool {
        self.inner.tracked.contains(full_id)
    }

    /// Whether updates for `full_id` are sent to this session
    pub fn forwards(&self, full_id: &str) -> bool {
        is_singleton_id(full_id) || self.is_tracking(full_id)
    }

    /// Resolve `controller` for this session ahead of the server registry
    ///
    /// Only a weak reference is kept; once the controller is dropped the
    /// entry is evicted on the next lookup.
    pub fn provide_default(&self, controller: &Controller) {
        self.inner
            .default_services
            .insert(controller.full_id().to_string(), controller.downgrade());
    }

    /// Detach from the server and stop answering requests
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.bridge.clear_request_handler();
        self.inner.server.detach_session(self.inner.id);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn find_controller(&self, target: &str) -> SyncResult<Controller> {
        let default = self
            .inner
            .default_services
            .get(target)
            .map(|entry| entry.value().clone());

        if let Some(weak) = default {
            match weak.upgrade() {
                Some(controller) => return Ok(controller),
                None => {
                    self.inner.default_services.remove(target);
                    tracing::debug!(session = %self.inner.id, controller = %target, "Evicted dropped default service");
                }
            }
        }

        self.inner.server.find(target)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────

    /// Dispatch one controller message and produce its response
    pub async fn handle_message(&self, payload: JsonValue) -> SyncResult<JsonValue> {
        let message: ControllerMessage =
            serde_json::from_value(payload).map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        let meta = MetaHandle::new(self.clone(), message.headers.clone());

        for middleware in self.inner.server.middleware() {
            if let Some(response) = middleware.on_incoming(&message, &meta).await? {
                return Ok(response);
            }
        }

        match message.request {
            ControllerRequest::Find { target, track } => {
                let controller = self.find_controller(&target)?;
                controller
                    .serialize_then(|| {
                        if track {
                            self.inner.tracked.insert(target.clone());
                            tracing::debug!(session = %self.inner.id, controller = %target, "Tracking controller");
                        }
                    })
                    .await
            }
            ControllerRequest::Action {
                target,
                action,
                argument,
            } => {
                self.find_controller(&target)?
                    .run_action(&action, &argument, meta)
                    .await
            }
            ControllerRequest::Meta { name, .. } => Err(SyncError::MetaNotAccepted(name)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────

    /// Send a proxy message to the client, reporting failures on the error stream
    pub(crate) async fn deliver(&self, message: &ProxyMessage) {
        let mut message = message.clone();
        for middleware in self.inner.server.middleware() {
            match middleware.on_outgoing(&message, self).await {
                Ok(Some(replacement)) => {
                    message = replacement;
                    break;
                }
                Ok(None) => {}
                Err(e) => return self.report(e.to_string()),
            }
        }

        if message.target().is_some_and(|target| !self.forwards(target)) {
            return;
        }

        let payload = match serde_json::to_value(&message) {
            Ok(payload) => payload,
            Err(e) => return self.report(e.to_string()),
        };
        if let Err(e) = self.inner.bridge.send_request(PROXY_TOPIC, payload).await {
            self.report(e.to_string());
        }
    }

    fn report(&self, reason: String) {
        tracing::warn!(session = %self.inner.id, name = %self.inner.name, %reason, "Delivery failed");
        let _ = self.inner.errors.send(SyncError::Delivery {
            session: self.inner.name.clone(),
            reason,
        });
    }
}

impl std::fmt::Debug for StructSyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructSyncSession")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}
