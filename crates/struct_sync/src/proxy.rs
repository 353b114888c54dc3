//! Proxies
//!
//! Client side mirror of a controller. The state starts as the `find`
//! snapshot and follows every update batch for its full id while tracked.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use struct_types::{Mutation, Value};
use tokio::sync::broadcast;

use crate::{Contract, ControllerRequest, StructSyncClient, SyncError, SyncResult};

#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

pub(crate) struct ProxyInner {
    contract: Contract,
    full_id: String,
    client: StructSyncClient,
    state: RwLock<Value>,
    events: HashMap<String, broadcast::Sender<Value>>,
    mutations: broadcast::Sender<Mutation>,
    disposed: AtomicBool,
}

impl Proxy {
    pub(crate) fn new(contract: Contract, client: StructSyncClient, full_id: String, state: Value) -> Self {
        let config = client.config();
        let events = contract
            .events()
            .map(|event| {
                let (tx, _) = broadcast::channel(config.event_capacity.max(1));
                (event.name().to_string(), tx)
            })
            .collect();
        let (mutations, _) = broadcast::channel(config.mutation_capacity.max(1));

        Self {
            inner: Arc::new(ProxyInner {
                contract,
                full_id,
                client,
                state: RwLock::new(state),
                events,
                mutations,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ProxyInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<ProxyInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn ptr_eq(&self, other: &std::sync::Weak<ProxyInner>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner), other.as_ptr())
    }

    pub fn full_id(&self) -> &str {
        &self.inner.full_id
    }

    pub fn contract(&self) -> &Contract {
        &self.inner.contract
    }

    /// Copy of the mirrored state
    pub fn snapshot(&self) -> Value {
        self.inner.state.read().clone()
    }

    /// Copy of one top-level field
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.state.read().get(field).cloned()
    }

    pub fn serialize(&self) -> SyncResult<JsonValue> {
        let state = self.inner.state.read();
        Ok(self.inner.contract.base_type().serialize(&state)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Remote Calls
    // ─────────────────────────────────────────────────────────────────────

    /// Call a declared action on the controller
    pub async fn call(&self, action: &str, argument: impl Into<Value>) -> SyncResult<Value> {
        let action_type = self.inner.contract.action(action)?.clone();
        let argument = action_type.argument().serialize(&argument.into())?;
        let result = self
            .inner
            .client
            .run_action(&self.inner.full_id, action, argument)
            .await?;
        Ok(action_type.result().deserialize(&result)?)
    }

    /// Refresh the state from the controller without tracking
    pub async fn synchronize(&self) -> SyncResult<()> {
        let data = self
            .inner
            .client
            .send_message(ControllerRequest::Find {
                target: self.inner.full_id.clone(),
                track: false,
            })
            .await?;
        let state = self.inner.contract.base_type().deserialize(&data)?;
        *self.inner.state.write() = state;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────

    pub fn subscribe_event(&self, event: &str) -> SyncResult<broadcast::Receiver<Value>> {
        self.inner
            .events
            .get(event)
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| SyncError::UnknownEvent(event.to_string()))
    }

    /// Every inbound edit, sent just before it is applied
    pub fn subscribe_mutations(&self) -> broadcast::Receiver<Mutation> {
        self.inner.mutations.subscribe()
    }

    /// Stop tracking; later calls do nothing
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.client.unregister(&self.inner.full_id, self);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn receive_mutation(&self, mutation: &Mutation) -> SyncResult<()> {
        let _ = self.inner.mutations.send(mutation.clone());
        let mut state = self.inner.state.write();
        Mutation::apply(&mut state, Some(self.inner.contract.base_type()), mutation)?;
        Ok(())
    }

    pub(crate) fn receive_event(&self, event: &str, payload: &JsonValue) -> SyncResult<()> {
        let event_type = self.inner.contract.event(event)?;
        let value = event_type.result().deserialize(payload)?;
        if let Some(tx) = self.inner.events.get(event) {
            let _ = tx.send(value);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("full_id", &self.inner.full_id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
