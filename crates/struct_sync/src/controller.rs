//! Controllers
//!
//! The authoritative side of a contract. State is only changed through
//! [`Controller::mutate`], which records edits with the live mutation cursor
//! and fans them out to every session before returning. The state lock is
//! held for the whole call, so concurrent `mutate` calls on one controller
//! are delivered in the order they acquired it.

use std::future::Future;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use struct_types::{Mutation, MutationCursor, MutationResult, Value};
use tokio::sync::Mutex;

use crate::server::ServerInner;
use crate::{Contract, MetaHandle, StructSyncServer, SyncError, SyncResult};

pub type ActionFuture = BoxFuture<'static, SyncResult<Value>>;

/// Implementation of a contract action, called with the owning controller
pub type ActionHandler = Arc<dyn Fn(Controller, Value, MetaHandle) -> ActionFuture + Send + Sync>;

#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

pub(crate) struct ControllerInner {
    contract: Contract,
    full_id: String,
    state: Mutex<Value>,
    actions: DashMap<String, ActionHandler>,
    server: RwLock<Option<Weak<ServerInner>>>,
}

/// Non-owning controller reference
#[derive(Clone)]
pub(crate) struct WeakController(Weak<ControllerInner>);

impl WeakController {
    pub(crate) fn upgrade(&self) -> Option<Controller> {
        self.0.upgrade().map(|inner| Controller { inner })
    }
}

impl Controller {
    pub(crate) fn new(contract: Contract, initial: Value) -> Self {
        let full_id = contract.full_id_of(&initial);
        Self {
            inner: Arc::new(ControllerInner {
                contract,
                full_id,
                state: Mutex::new(initial),
                actions: DashMap::new(),
                server: RwLock::new(None),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakController {
        WeakController(Arc::downgrade(&self.inner))
    }

    pub fn full_id(&self) -> &str {
        &self.inner.full_id
    }

    pub fn contract(&self) -> &Contract {
        &self.inner.contract
    }

    fn server(&self) -> Option<StructSyncServer> {
        self.inner
            .server
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(StructSyncServer::from_inner)
    }

    pub fn is_registered(&self) -> bool {
        self.server().is_some()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────

    /// Bind under the full id; fails if the id is taken on that server or
    /// this controller is bound to a live server already
    pub fn register(&self, server: &StructSyncServer) -> SyncResult<()> {
        let mut bound = self.inner.server.write();
        if bound.as_ref().is_some_and(|s| s.strong_count() > 0) {
            return Err(SyncError::AlreadyRegistered(self.inner.full_id.clone()));
        }
        server.register(self)?;
        *bound = Some(server.downgrade());
        Ok(())
    }

    /// Remove from the bound server; calling it again does nothing
    pub fn unregister(&self) {
        let server = self.inner.server.write().take();
        if let Some(server) = server.and_then(|s| s.upgrade()) {
            StructSyncServer::from_inner(server).unregister(self.full_id());
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────

    /// Install the handler for a declared action
    pub fn implement<F, Fut>(&self, action: &str, handler: F) -> SyncResult<()>
    where
        F: Fn(Controller, Value, MetaHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<Value>> + Send + 'static,
    {
        self.inner.contract.action(action)?;
        let handler: ActionHandler = Arc::new(
            move |controller: Controller, argument: Value, meta: MetaHandle| -> ActionFuture {
                Box::pin(handler(controller, argument, meta))
            },
        );
        self.inner.actions.insert(action.to_string(), handler);
        Ok(())
    }

    /// Decode the argument, run the implementation and encode its result
    pub async fn run_action(&self, action: &str, argument: &JsonValue, meta: MetaHandle) -> SyncResult<JsonValue> {
        let action_type = self.inner.contract.action(action)?.clone();
        let handler = self
            .inner
            .actions
            .get(action)
            .map(|h| h.value().clone())
            .ok_or_else(|| SyncError::ActionNotFound(action.to_string()))?;

        let argument = action_type.argument().deserialize(argument)?;
        tracing::debug!(controller = %self.inner.full_id, action, "Running action");
        let result = handler(self.clone(), argument, meta).await?;
        Ok(action_type.result().serialize(&result)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────

    /// Apply edits through a live cursor and deliver them to every session
    ///
    /// Returns the recorded edits once the fan-out has completed. A failing
    /// thunk leaves the state untouched and sends nothing.
    pub async fn mutate<F>(&self, thunk: F) -> SyncResult<Vec<Mutation>>
    where
        F: FnOnce(&MutationCursor<'_>) -> MutationResult<()> + Send,
    {
        let mut state = self.inner.state.lock().await;
        let mutations = Mutation::create(
            Some(&mut *state),
            Some(self.inner.contract.base_type()),
            thunk,
        )?;

        if mutations.is_empty() {
            return Ok(mutations);
        }
        tracing::debug!(controller = %self.inner.full_id, edits = mutations.len(), "Mutated controller");

        if let Some(server) = self.server() {
            server.notify_mutation(self.full_id(), &mutations).await?;
        }
        Ok(mutations)
    }

    /// Serialize and push an event; independent of `mutate`
    pub async fn emit(&self, event: &str, value: impl Into<Value>) -> SyncResult<()> {
        let event_type = self.inner.contract.event(event)?;
        let payload = event_type.result().serialize(&value.into())?;

        if let Some(server) = self.server() {
            server.emit_event(self.full_id(), event, payload).await?;
        }
        Ok(())
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> Value {
        self.inner.state.lock().await.clone()
    }

    pub async fn serialize(&self) -> SyncResult<JsonValue> {
        let state = self.inner.state.lock().await;
        Ok(self.inner.contract.base_type().serialize(&state)?)
    }

    /// Serialize and run `then` before any later `mutate` can deliver edits
    pub(crate) async fn serialize_then(&self, then: impl FnOnce()) -> SyncResult<JsonValue> {
        let state = self.inner.state.lock().await;
        let snapshot = self.inner.contract.base_type().serialize(&state)?;
        then();
        Ok(snapshot)
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("full_id", &self.inner.full_id)
            .finish()
    }
}
