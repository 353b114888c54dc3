//! Polymorphic serializers
//!
//! Both serializers keep an explicit registry of structs keyed by struct
//! name. Serialized instances carry that name in the reserved `__type`
//! property, and decoding dispatches on it. Registering a new struct extends
//! the set of accepted variants without touching existing schemas.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::{ResultPathExt, SerializationError, SerializationResult};
use crate::serializer::{Deserializer, JsonSerializer, Primitive, Serializer};
use crate::structs::Struct;
use crate::types::{Type, TypeKind};
use crate::value::{GraphNode, GraphRef, Value};

/// Reserved property carrying the registered struct name
pub const TYPE_TAG_KEY: &str = "__type";

fn missing_type(tag: &str) -> SerializationError {
    SerializationError::new(format!("Cannot find type \"{tag}\""))
}

fn read_tag<D: Deserializer>(handle: &D::Handle, d: &D) -> SerializationResult<String> {
    d.object_property(handle, TYPE_TAG_KEY)
        .and_then(|h| d.parse_atom(&h))
        .ok_or_else(|| SerializationError::expected("string").append_path(TYPE_TAG_KEY))
}

fn serialize_tagged<S: Serializer>(
    st: &Struct,
    value: &Value,
    s: &mut S,
) -> SerializationResult<S::Handle> {
    let mut handle = st.base_type().serialize_with(value, s)?;
    let tag = s.create_primitive(Primitive::String(st.name().to_string()));
    s.add_object_property(&mut handle, TYPE_TAG_KEY, tag);
    Ok(handle)
}

// ─────────────────────────────────────────────────────────────────────────────
// Polymorphic Serializer
// ─────────────────────────────────────────────────────────────────────────────

/// Closed registry of structs sharing one serialized slot
#[derive(Clone)]
pub struct PolymorphicSerializer {
    inner: Arc<PolymorphicInner>,
}

struct PolymorphicInner {
    name: String,
    types: DashMap<String, Struct>,
}

impl PolymorphicSerializer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(PolymorphicInner {
                name: name.into(),
                types: DashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register a struct under its own name, replacing any previous entry
    pub fn register(&self, st: &Struct) {
        tracing::debug!(serializer = %self.inner.name, variant = %st.name(), "Registered variant");
        self.inner.types.insert(st.name().to_string(), st.clone());
    }

    pub fn get(&self, tag: &str) -> Option<Struct> {
        self.inner.types.get(tag).map(|entry| entry.clone())
    }

    /// Type to use inside other schemas, e.g. `Type::array(poly.as_type())`
    pub fn as_type(&self) -> Type {
        Type::from_kind(self.inner.name.clone(), TypeKind::Polymorphic(self.clone()))
    }

    pub fn serialize(&self, value: &Value) -> SerializationResult<serde_json::Value> {
        self.serialize_with(value, &mut JsonSerializer)
    }

    pub fn deserialize(&self, handle: &serde_json::Value) -> SerializationResult<Value> {
        self.as_type().deserialize(handle)
    }

    fn struct_for_value(&self, value: &Value) -> SerializationResult<Struct> {
        let tag = value.object_type_id().ok_or_else(|| {
            SerializationError::new(format!(
                "Expected an instance of a struct registered in \"{}\"",
                self.inner.name
            ))
        })?;
        self.get(tag).ok_or_else(|| missing_type(tag))
    }

    pub(crate) fn verify(&self, value: &Value) -> SerializationResult<()> {
        self.struct_for_value(value)?.verify(value)
    }

    pub(crate) fn serialize_with<S: Serializer>(
        &self,
        value: &Value,
        s: &mut S,
    ) -> SerializationResult<S::Handle> {
        let st = self.struct_for_value(value)?;
        serialize_tagged(&st, value, s)
    }

    pub(crate) fn deserialize_with<D: Deserializer>(
        &self,
        handle: &D::Handle,
        d: &D,
    ) -> SerializationResult<Value> {
        let tag = read_tag(handle, d)?;
        let st = self.get(&tag).ok_or_else(|| missing_type(&tag))?;
        st.base_type().deserialize_with(handle, d)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Polymorphic Graph Serializer
// ─────────────────────────────────────────────────────────────────────────────

/// Polymorphic serializer for object graphs with cross references
///
/// Every member struct must have a string `id` property. References created
/// with [`PolymorphicGraphSerializer::reference`] serialize as bare ids and are
/// resolved through the decode context, which makes cycles and forward
/// references possible.
#[derive(Clone)]
pub struct PolymorphicGraphSerializer {
    inner: Arc<GraphInner>,
}

struct GraphInner {
    name: String,
    types: DashMap<String, Struct>,
    context: Mutex<Option<HashMap<String, GraphNode>>>,
}

/// Reference slot resolved against an active graph decode
#[derive(Clone)]
pub struct GraphRefType {
    graph: Weak<GraphInner>,
}

/// Clears the decode context when dropped
struct ContextGuard<'a> {
    inner: &'a GraphInner,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        *self.inner.context.lock() = None;
    }
}

impl PolymorphicGraphSerializer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                name: name.into(),
                types: DashMap::new(),
                context: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn register(&self, st: &Struct) {
        tracing::debug!(serializer = %self.inner.name, variant = %st.name(), "Registered graph variant");
        self.inner.types.insert(st.name().to_string(), st.clone());
    }

    /// Type of a property pointing at another graph member
    pub fn reference(&self) -> Type {
        Type::from_kind(
            self.inner.name.clone(),
            TypeKind::GraphRef(GraphRefType {
                graph: Arc::downgrade(&self.inner),
            }),
        )
    }

    /// Wrap decoded or freshly built values into graph nodes
    pub fn node(value: Value) -> GraphNode {
        Arc::new(RwLock::new(value))
    }

    fn open_context(&self) -> SerializationResult<ContextGuard<'_>> {
        let mut context = self.inner.context.lock();
        if context.is_some() {
            return Err(SerializationError::new(
                "Cannot create context, context already exists",
            ));
        }
        *context = Some(HashMap::new());
        Ok(ContextGuard { inner: &self.inner })
    }

    pub fn serialize(&self, nodes: &[GraphNode]) -> SerializationResult<Vec<serde_json::Value>> {
        if self.inner.context.lock().is_some() {
            return Err(SerializationError::new(
                "Cannot create context, context already exists",
            ));
        }

        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            let value = node.read().clone();
            let id = value
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let tag = value.object_type_id().unwrap_or_default();
            let st = self
                .inner
                .types
                .get(tag)
                .map(|entry| entry.clone())
                .ok_or_else(|| missing_type(tag).append_path(&id))?;
            out.push(serialize_tagged(&st, &value, &mut JsonSerializer).at(&id)?);
        }
        Ok(out)
    }

    /// Decode a list of serialized members in two passes
    ///
    /// The first pass creates a default instance per id, the second decodes
    /// every member with references resolved against the first pass.
    pub fn deserialize(&self, items: &[serde_json::Value]) -> SerializationResult<Vec<GraphNode>> {
        let _guard = self.open_context()?;
        let d = crate::serializer::JsonDeserializer;

        let mut pending = Vec::with_capacity(items.len());
        for item in items {
            let tag = read_tag(item, &d)?;
            let id = d
                .object_property(item, "id")
                .and_then(|h| d.parse_atom(&h))
                .ok_or_else(|| SerializationError::expected("string").append_path("id"))?;
            let st = self
                .inner
                .types
                .get(&tag)
                .map(|entry| entry.clone())
                .ok_or_else(|| missing_type(&tag).append_path(&id))?;

            let node = Self::node(st.default_value());
            if let Some(context) = self.inner.context.lock().as_mut() {
                context.insert(id.clone(), node.clone());
            }
            pending.push((id, st, item, node));
        }

        let mut nodes = Vec::with_capacity(pending.len());
        for (id, st, item, node) in pending {
            let decoded = st.deserialize(item).at(&id)?;
            *node.write() = decoded;
            nodes.push(node);
        }

        tracing::debug!(serializer = %self.inner.name, count = nodes.len(), "Decoded object graph");
        Ok(nodes)
    }
}

impl GraphRefType {
    pub(crate) fn serialize_with<S: Serializer>(
        &self,
        value: &Value,
        s: &mut S,
    ) -> SerializationResult<S::Handle> {
        match value {
            Value::Ref(r) => Ok(s.create_primitive(Primitive::String(r.id.clone()))),
            _ => Err(SerializationError::expected("reference")),
        }
    }

    pub(crate) fn deserialize_with<D: Deserializer>(
        &self,
        handle: &D::Handle,
        d: &D,
    ) -> SerializationResult<Value> {
        let id = d
            .parse_atom(handle)
            .ok_or_else(|| SerializationError::expected("string"))?;

        let outside =
            || SerializationError::new("Cannot deserialize polymorphic graph reference outside of context");
        let graph = self.graph.upgrade().ok_or_else(outside)?;
        let context = graph.context.lock();
        let table = context.as_ref().ok_or_else(outside)?;
        let node = table
            .get(&id)
            .ok_or_else(|| SerializationError::new(format!("Cannot resolve reference to \"{id}\"")))?;
        Ok(Value::Ref(GraphRef::new(id.clone(), node)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
