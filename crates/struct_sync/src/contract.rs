//! Contracts
//!
//! A contract pairs a struct schema with its actions and events. Controllers
//! and proxies created from the same contract share that schema.

use std::collections::BTreeMap;
use std::sync::Arc;

use struct_types::{Struct, Type, Value};

use crate::{
    ActionType, Controller, EventType, Proxy, StructSyncClient, SyncError, SyncResult,
    make_full_id,
};

/// Options for [`Contract::make_proxy`]
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Instance id, `None` for the singleton
    pub id: Option<String>,
    /// Receive updates after the initial snapshot
    pub track: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self { id: None, track: true }
    }
}

impl ProxyOptions {
    pub fn instance(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn untracked(mut self) -> Self {
        self.track = false;
        self
    }
}

#[derive(Clone)]
pub struct Contract {
    inner: Arc<ContractInner>,
}

struct ContractInner {
    base: Struct,
    actions: BTreeMap<String, ActionType>,
    events: BTreeMap<String, EventType>,
}

impl Contract {
    pub fn define(
        base: Struct,
        actions: impl IntoIterator<Item = ActionType>,
        events: impl IntoIterator<Item = EventType>,
    ) -> Self {
        Self {
            inner: Arc::new(ContractInner {
                base,
                actions: actions
                    .into_iter()
                    .map(|a| (a.name().to_string(), a))
                    .collect(),
                events: events
                    .into_iter()
                    .map(|e| (e.name().to_string(), e))
                    .collect(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.base.name()
    }

    pub fn base(&self) -> &Struct {
        &self.inner.base
    }

    pub fn base_type(&self) -> &Type {
        self.inner.base.base_type()
    }

    pub fn action(&self, name: &str) -> SyncResult<&ActionType> {
        self.inner
            .actions
            .get(name)
            .ok_or_else(|| SyncError::ActionNotFound(name.to_string()))
    }

    pub fn event(&self, name: &str) -> SyncResult<&EventType> {
        self.inner
            .events
            .get(name)
            .ok_or_else(|| SyncError::UnknownEvent(name.to_string()))
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionType> {
        self.inner.actions.values()
    }

    pub fn events(&self) -> impl Iterator<Item = &EventType> {
        self.inner.events.values()
    }

    pub fn full_id(&self, id: Option<&str>) -> String {
        make_full_id(self.name(), id)
    }

    /// Full id of an instance, taken from its `id` field when present
    pub fn full_id_of(&self, value: &Value) -> String {
        self.full_id(value.get("id").and_then(Value::as_str))
    }

    /// Authoritative controller over `initial`
    pub fn controller(&self, initial: Value) -> SyncResult<Controller> {
        self.inner.base.verify(&initial)?;
        Ok(Controller::new(self.clone(), initial))
    }

    /// Controller over the schema default
    pub fn default_controller(&self) -> Controller {
        Controller::new(self.clone(), self.inner.base.default_value())
    }

    /// Fetch a controller snapshot and mirror it
    pub async fn make_proxy(&self, client: &StructSyncClient, options: ProxyOptions) -> SyncResult<Proxy> {
        let target = self.full_id(options.id.as_deref());
        client.find(self, &target, options.track).await
    }

    /// Tracked singleton proxy holding the schema default, without a round trip
    pub fn default_proxy(&self, client: &StructSyncClient) -> Proxy {
        let proxy = Proxy::new(
            self.clone(),
            client.clone(),
            self.name().to_string(),
            self.inner.base.default_value(),
        );
        client.register(proxy.full_id(), &proxy);
        proxy
    }
}

impl std::fmt::Debug for Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contract")
            .field("name", &self.name())
            .field("actions", &self.inner.actions.keys().collect::<Vec<_>>())
            .field("events", &self.inner.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> Contract {
        let base = Struct::define("Counter", [("id", Type::string()), ("count", Type::number())]);
        Contract::define(
            base,
            [ActionType::define("increment", Type::number(), Type::number())],
            [EventType::define("onReset", Type::empty())],
        )
    }

    #[test]
    fn test_lookup() {
        let contract = counter();
        assert_eq!(contract.name(), "Counter");
        assert!(contract.action("increment").is_ok());
        assert!(matches!(
            contract.action("decrement"),
            Err(SyncError::ActionNotFound(_))
        ));
        assert!(contract.event("onReset").is_ok());
        assert_eq!(contract.actions().count(), 1);
    }

    #[test]
    fn test_full_id_of_instance() {
        let contract = counter();
        let singleton = contract.base().default_value();
        assert_eq!(contract.full_id_of(&singleton), "Counter");

        let instance = contract.base().instantiate([("id", "a")]).unwrap();
        assert_eq!(contract.full_id_of(&instance), "Counter::a");
    }

    #[test]
    fn test_controller_verifies_initial_state() {
        let contract = counter();
        let bad = Value::typed_object(
            "Counter",
            [("id".to_string(), Value::from(1))].into_iter().collect(),
        );
        assert!(contract.controller(bad).is_err());
        assert!(contract.controller(contract.base().default_value()).is_ok());
    }

    #[test]
    fn test_default_controller_starts_from_schema_default() {
        let contract = counter();
        let controller = contract.default_controller();
        assert_eq!(controller.full_id(), "Counter");

        let state = tokio_test::block_on(controller.snapshot());
        assert_eq!(state, contract.base().default_value());
    }
}
