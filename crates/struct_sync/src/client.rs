//! StructSync Client
//!
//! Sends controller requests over the bridge and routes update batches to
//! the proxies tracking each full id.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use struct_types::{Mutation, Value};

use crate::proxy::ProxyInner;
use crate::{
    BatchAction, BridgeError, CONTROLLER_TOPIC, ClientMiddleware, Contract, ControllerMessage,
    ControllerRequest, MessageBridge, MetaMessageType, PROXY_TOPIC, Proxy, ProxyMessage,
    RequestHandler, SyncConfig, SyncError, SyncResult,
};

#[derive(Clone)]
pub struct StructSyncClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    bridge: Arc<dyn MessageBridge>,
    config: SyncConfig,

    /// Tracked proxies by full id; one id may have many proxies
    tracked: DashMap<String, Vec<Weak<ProxyInner>>>,

    middleware: RwLock<Vec<Arc<dyn ClientMiddleware>>>,
}

/// Routes bridge requests to a client without keeping it alive
struct ClientHandler {
    client: Weak<ClientInner>,
}

#[async_trait]
impl RequestHandler for ClientHandler {
    async fn handle(&self, topic: &str, payload: JsonValue) -> Result<JsonValue, BridgeError> {
        if topic != PROXY_TOPIC {
            return Err(BridgeError::NoHandler(topic.to_string()));
        }
        let client = self
            .client
            .upgrade()
            .map(|inner| StructSyncClient { inner })
            .ok_or(BridgeError::Disconnected)?;

        client
            .handle_message(payload)
            .await
            .map_err(|e| BridgeError::Remote(e.to_string()))
    }
}

impl StructSyncClient {
    pub fn new(bridge: Arc<dyn MessageBridge>) -> Self {
        Self::with_config(bridge, SyncConfig::default())
    }

    pub fn with_config(bridge: Arc<dyn MessageBridge>, config: SyncConfig) -> Self {
        let inner = Arc::new(ClientInner {
            bridge,
            config,
            tracked: DashMap::new(),
            middleware: RwLock::new(Vec::new()),
        });
        inner.bridge.set_request_handler(Arc::new(ClientHandler {
            client: Arc::downgrade(&inner),
        }));
        Self { inner }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Append a middleware to the chain
    pub fn use_middleware(&self, middleware: Arc<dyn ClientMiddleware>) {
        self.inner.middleware.write().push(middleware);
    }

    fn middleware(&self) -> Vec<Arc<dyn ClientMiddleware>> {
        self.inner.middleware.read().clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tracking
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn register(&self, target: &str, proxy: &Proxy) {
        self.inner
            .tracked
            .entry(target.to_string())
            .or_default()
            .push(proxy.downgrade());
    }

    /// Returns whether the proxy was tracked
    pub(crate) fn unregister(&self, target: &str, proxy: &Proxy) -> bool {
        let mut removed = false;
        if let Some(mut proxies) = self.inner.tracked.get_mut(target) {
            let before = proxies.len();
            proxies.retain(|p| !proxy.ptr_eq(p) && p.strong_count() > 0);
            removed = proxies.len() < before;
        }
        self.inner.tracked.remove_if(target, |_, proxies| proxies.is_empty());
        removed
    }

    /// Live proxies tracking `target`
    pub fn tracked(&self, target: &str) -> Vec<Proxy> {
        self.inner
            .tracked
            .get(target)
            .map(|proxies| {
                proxies
                    .iter()
                    .filter_map(Weak::upgrade)
                    .map(Proxy::from_inner)
                    .collect()
            })
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────

    /// Fetch a snapshot of `target` and build a proxy over it
    pub async fn find(&self, contract: &Contract, target: &str, track: bool) -> SyncResult<Proxy> {
        let data = self
            .send_message(ControllerRequest::Find {
                target: target.to_string(),
                track,
            })
            .await?;
        let state = contract.base_type().deserialize(&data)?;
        let proxy = Proxy::new(contract.clone(), self.clone(), target.to_string(), state);

        if track {
            self.register(target, &proxy);
        }
        tracing::debug!(controller = %target, track, "Created proxy");
        Ok(proxy)
    }

    pub async fn run_action(&self, target: &str, action: &str, argument: JsonValue) -> SyncResult<JsonValue> {
        self.send_message(ControllerRequest::Action {
            target: target.to_string(),
            action: action.to_string(),
            argument,
        })
        .await
    }

    /// Send a typed meta message and decode the response
    pub async fn send_meta(&self, meta_type: &MetaMessageType, data: impl Into<Value>) -> SyncResult<Value> {
        let data = meta_type.argument().serialize(&data.into())?;
        let response = self
            .send_message(ControllerRequest::Meta {
                name: meta_type.name().to_string(),
                data,
            })
            .await?;
        Ok(meta_type.result().deserialize(&response)?)
    }

    /// Pass a request through the middleware chain and send it
    pub async fn send_message(&self, request: ControllerRequest) -> SyncResult<JsonValue> {
        let mut message = ControllerMessage::new(request);
        for middleware in self.middleware() {
            if let Some(replacement) = middleware.on_outgoing(&message).await? {
                message = replacement;
                break;
            }
        }

        let payload =
            serde_json::to_value(&message).map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        Ok(self.inner.bridge.send_request(CONTROLLER_TOPIC, payload).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────

    /// Apply one proxy message to every proxy tracking its id
    pub async fn handle_message(&self, payload: JsonValue) -> SyncResult<JsonValue> {
        let message: ProxyMessage =
            serde_json::from_value(payload).map_err(|e| SyncError::InvalidMessage(e.to_string()))?;

        for middleware in self.middleware() {
            if let Some(response) = middleware.on_incoming(&message).await? {
                return Ok(response);
            }
        }

        match message {
            ProxyMessage::Batch { id, actions } => {
                let items = actions
                    .into_iter()
                    .map(|action| match action {
                        BatchAction::Mutation(m) => Inbound::Mutation(Mutation::from_message(m)),
                        BatchAction::Event(e) => Inbound::Event(e.event, e.value),
                    })
                    .collect::<Vec<_>>();

                // every proxy sees the whole batch; the first failure is returned afterwards
                let mut failure = None;
                for proxy in self.tracked(&id) {
                    if let Err(e) = Self::apply_batch(&proxy, &items) {
                        tracing::warn!(controller = %id, error = %e, "Proxy failed to apply batch");
                        failure.get_or_insert(e);
                    }
                }
                match failure {
                    Some(e) => Err(e),
                    None => Ok(JsonValue::Null),
                }
            }
            ProxyMessage::Meta { name, .. } => Err(SyncError::MetaNotAccepted(name)),
        }
    }

    fn apply_batch(proxy: &Proxy, items: &[Inbound]) -> SyncResult<()> {
        for item in items {
            match item {
                Inbound::Mutation(mutation) => proxy.receive_mutation(mutation)?,
                Inbound::Event(event, value) => proxy.receive_event(event, value)?,
            }
        }
        Ok(())
    }
}

enum Inbound {
    Mutation(Mutation),
    Event(String, JsonValue),
}

impl std::fmt::Debug for StructSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructSyncClient")
            .field("tracked", &self.inner.tracked.len())
            .finish()
    }
}
