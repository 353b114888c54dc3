//! Runtime values produced and consumed by schema types
//!
//! Every [`Type`](crate::Type) decodes into a [`Value`] tree. The tree keeps
//! container flavours (ordered maps, insertion ordered sets, tagged variants)
//! distinct so that mutations can be replayed against it without consulting a
//! wire format.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

// ─────────────────────────────────────────────────────────────────────────────
// Graph References
// ─────────────────────────────────────────────────────────────────────────────

/// Shared node of an object graph decoded by a graph serializer
pub type GraphNode = Arc<RwLock<Value>>;

/// Reference from one graph node to another, addressed by id
///
/// The target is held weakly so cyclic graphs are owned by whoever holds the
/// node list returned from decoding.
#[derive(Clone)]
pub struct GraphRef {
    /// Stable id of the referenced node
    pub id: String,
    target: Weak<RwLock<Value>>,
}

impl GraphRef {
    /// Create a reference to a node
    pub fn new(id: impl Into<String>, node: &GraphNode) -> Self {
        Self {
            id: id.into(),
            target: Arc::downgrade(node),
        }
    }

    /// Create a reference that only carries an id
    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: Weak::new(),
        }
    }

    /// Resolve the referenced node if it is still alive
    pub fn resolve(&self) -> Option<GraphNode> {
        self.target.upgrade()
    }
}

impl PartialEq for GraphRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for GraphRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GraphRef({})", self.id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// Decoded value of a schema type
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Null / absent value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Numbers are always 64-bit floats
    Number(f64),
    /// UTF-8 string, also used for atoms and string enums
    String(String),
    /// Ordered array of values
    Array(Vec<Value>),
    /// Object with an optional struct name
    Object {
        /// Name of the struct this object was decoded as
        type_id: Option<String>,
        /// Field values
        fields: BTreeMap<String, Value>,
    },
    /// String keyed map in insertion order
    Map(Vec<(String, Value)>),
    /// Set of unique values in insertion order
    Set(Vec<Value>),
    /// Discriminated union member
    Variant {
        tag: String,
        value: Box<Value>,
    },
    /// Reference into an object graph
    Ref(GraphRef),
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Accessors
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as i64 if the number has no fractional part
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Get object fields
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Get the struct name of a typed object
    pub fn object_type_id(&self) -> Option<&str> {
        match self {
            Value::Object { type_id, .. } => type_id.as_deref(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&[Value]> {
        match self {
            Value::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_graph_ref(&self) -> Option<&GraphRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Get a field from an object or an entry from a map
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object { fields, .. } => fields.get(key),
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Mutable variant of [`Value::get`]
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Value::Object { fields, .. } => fields.get_mut(key),
            Value::Map(entries) => entries
                .iter_mut()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Get an element from an array or set
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Array(items) | Value::Set(items) => items.get(index),
            _ => None,
        }
    }

    pub fn get_index_mut(&mut self, index: usize) -> Option<&mut Value> {
        match self {
            Value::Array(items) | Value::Set(items) => items.get_mut(index),
            _ => None,
        }
    }

    /// Number of entries in a container, `None` for scalars
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Array(items) | Value::Set(items) => Some(items.len()),
            Value::Map(entries) => Some(entries.len()),
            Value::Object { fields, .. } => Some(fields.len()),
            _ => None,
        }
    }

    /// Short description of the value's shape, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object { .. } => "object",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Variant { .. } => "variant",
            Value::Ref(_) => "reference",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Map & Set Helpers
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    /// Insert or replace a map entry, keeping the position of an existing key
    pub fn map_insert(entries: &mut Vec<(String, Value)>, key: impl Into<String>, value: Value) {
        let key = key.into();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => entries.push((key, value)),
        }
    }

    /// Remove a map entry, returning its value
    pub fn map_remove(entries: &mut Vec<(String, Value)>, key: &str) -> Option<Value> {
        let position = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(position).1)
    }

    /// Insert into a set, returns false if the value was already present
    pub fn set_insert(items: &mut Vec<Value>, value: Value) -> bool {
        if items.contains(&value) {
            return false;
        }
        items.push(value);
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Constructors
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    /// Create an object bound to a struct name
    pub fn typed_object(type_id: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Value::Object {
            type_id: Some(type_id.into()),
            fields,
        }
    }

    /// Create an untyped object
    pub fn object(fields: BTreeMap<String, Value>) -> Self {
        Value::Object {
            type_id: None,
            fields,
        }
    }

    /// Create an untyped object from key-value pairs
    pub fn object_from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Value::Object {
            type_id: None,
            fields,
        }
    }

    /// Create a map from key-value pairs
    pub fn map_from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut entries = Vec::new();
        for (k, v) in pairs {
            Value::map_insert(&mut entries, k, v.into());
        }
        Value::Map(entries)
    }

    /// Create a set, dropping duplicates
    pub fn set_from<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut set = Vec::new();
        for item in items {
            Value::set_insert(&mut set, item.into());
        }
        Value::Set(set)
    }

    /// Create a union variant
    pub fn variant(tag: impl Into<String>, value: impl Into<Value>) -> Self {
        Value::Variant {
            tag: tag.into(),
            value: Box::new(value.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<GraphRef> for Value {
    fn from(r: GraphRef) -> Self {
        Value::Ref(r)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serde_json::Value Interop
// ─────────────────────────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                let fields = obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
                Value::Object {
                    type_id: None,
                    fields,
                }
            }
        }
    }
}

impl Value {
    /// Untyped JSON rendering, used for `any` typed values
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) | Value::Set(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object { fields, .. } => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Map(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Variant { tag, value } => serde_json::json!({
                "type": tag,
                "value": value.to_json(),
            }),
            Value::Ref(r) => serde_json::Value::String(r.id.clone()),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        v.to_json()
    }
}

/// Integral numbers are written as JSON integers
pub(crate) fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        serde_json::Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
