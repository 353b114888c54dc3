//! Pluggable wire-format visitors
//!
//! Schema types never build wire data directly. They drive a [`Serializer`]
//! to construct output handles and a [`Deserializer`] to inspect input
//! handles, so the same schema can target a JSON tree, a raw [`Value`] tree or
//! any other format that provides these primitives.

use crate::value::{Value, number_to_json};

// ─────────────────────────────────────────────────────────────────────────────
// Primitives
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar passed across the visitor boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Number(f64),
    String(String),
}

impl Primitive {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Primitive::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert a scalar [`Value`], `None` for everything else
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Primitive::Bool(*b)),
            Value::Number(n) => Some(Primitive::Number(*n)),
            Value::String(s) => Some(Primitive::String(s.clone())),
            _ => None,
        }
    }
}

impl From<Primitive> for Value {
    fn from(p: Primitive) -> Self {
        match p {
            Primitive::Bool(b) => Value::Bool(b),
            Primitive::Number(n) => Value::Number(n),
            Primitive::String(s) => Value::String(s),
        }
    }
}

/// Coarse shape of an input handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

// ─────────────────────────────────────────────────────────────────────────────
// Visitor Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Builds wire handles on behalf of a schema type
pub trait Serializer {
    type Handle;

    fn create_object(&mut self) -> Self::Handle;
    fn add_object_property(&mut self, object: &mut Self::Handle, key: &str, value: Self::Handle);
    fn create_array(&mut self) -> Self::Handle;
    fn add_array_element(&mut self, array: &mut Self::Handle, value: Self::Handle);
    fn create_map(&mut self) -> Self::Handle;
    fn add_map_property(&mut self, map: &mut Self::Handle, key: &str, value: Self::Handle);
    fn create_null(&mut self) -> Self::Handle;
    fn create_primitive(&mut self, value: Primitive) -> Self::Handle;

    /// Atoms are strings that a format may intern or encode specially
    fn create_atom(&mut self, atom: &str) -> Self::Handle {
        self.create_primitive(Primitive::String(atom.to_string()))
    }

    /// Encode an untyped value
    fn create_any(&mut self, value: &Value) -> Self::Handle;
}

/// Reads wire handles on behalf of a schema type
pub trait Deserializer {
    type Handle: Clone;

    fn kind(&self, handle: &Self::Handle) -> HandleKind;

    fn is_null(&self, handle: &Self::Handle) -> bool {
        self.kind(handle) == HandleKind::Null
    }

    fn parse_primitive(&self, handle: &Self::Handle) -> Option<Primitive>;

    fn parse_atom(&self, handle: &Self::Handle) -> Option<String> {
        match self.parse_primitive(handle) {
            Some(Primitive::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Property of an object handle, `None` if absent or not an object
    fn object_property(&self, handle: &Self::Handle, key: &str) -> Option<Self::Handle>;

    fn array_elements(&self, handle: &Self::Handle) -> Option<Vec<Self::Handle>>;

    /// Entries of an object handle read as a string keyed map
    fn map_entries(&self, handle: &Self::Handle) -> Option<Vec<(String, Self::Handle)>>;

    /// Decode without a schema
    fn parse_any(&self, handle: &Self::Handle) -> Value;
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Default backend producing a plain `serde_json::Value` tree
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    type Handle = serde_json::Value;

    fn create_object(&mut self) -> Self::Handle {
        serde_json::Value::Object(serde_json::Map::new())
    }

    fn add_object_property(&mut self, object: &mut Self::Handle, key: &str, value: Self::Handle) {
        if let serde_json::Value::Object(map) = object {
            map.insert(key.to_string(), value);
        }
    }

    fn create_array(&mut self) -> Self::Handle {
        serde_json::Value::Array(Vec::new())
    }

    fn add_array_element(&mut self, array: &mut Self::Handle, value: Self::Handle) {
        if let serde_json::Value::Array(items) = array {
            items.push(value);
        }
    }

    fn create_map(&mut self) -> Self::Handle {
        self.create_object()
    }

    fn add_map_property(&mut self, map: &mut Self::Handle, key: &str, value: Self::Handle) {
        self.add_object_property(map, key, value);
    }

    fn create_null(&mut self) -> Self::Handle {
        serde_json::Value::Null
    }

    fn create_primitive(&mut self, value: Primitive) -> Self::Handle {
        match value {
            Primitive::Bool(b) => serde_json::Value::Bool(b),
            Primitive::Number(n) => number_to_json(n),
            Primitive::String(s) => serde_json::Value::String(s),
        }
    }

    fn create_any(&mut self, value: &Value) -> Self::Handle {
        value.to_json()
    }
}

/// Default backend reading a plain `serde_json::Value` tree
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeserializer;

impl Deserializer for JsonDeserializer {
    type Handle = serde_json::Value;

    fn kind(&self, handle: &Self::Handle) -> HandleKind {
        match handle {
            serde_json::Value::Null => HandleKind::Null,
            serde_json::Value::Bool(_) => HandleKind::Bool,
            serde_json::Value::Number(_) => HandleKind::Number,
            serde_json::Value::String(_) => HandleKind::String,
            serde_json::Value::Array(_) => HandleKind::Array,
            serde_json::Value::Object(_) => HandleKind::Object,
        }
    }

    fn parse_primitive(&self, handle: &Self::Handle) -> Option<Primitive> {
        match handle {
            serde_json::Value::Bool(b) => Some(Primitive::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Primitive::Number),
            serde_json::Value::String(s) => Some(Primitive::String(s.clone())),
            _ => None,
        }
    }

    fn object_property(&self, handle: &Self::Handle, key: &str) -> Option<Self::Handle> {
        handle.as_object().and_then(|obj| obj.get(key)).cloned()
    }

    fn array_elements(&self, handle: &Self::Handle) -> Option<Vec<Self::Handle>> {
        handle.as_array().cloned()
    }

    fn map_entries(&self, handle: &Self::Handle) -> Option<Vec<(String, Self::Handle)>> {
        handle
            .as_object()
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn parse_any(&self, handle: &Self::Handle) -> Value {
        Value::from(handle.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Backend producing a raw [`Value`] tree
///
/// Objects are written untyped and maps keep their insertion order, which
/// makes the output suitable for migration steps that rewrite raw fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueSerializer;

impl Serializer for ValueSerializer {
    type Handle = Value;

    fn create_object(&mut self) -> Self::Handle {
        Value::object(Default::default())
    }

    fn add_object_property(&mut self, object: &mut Self::Handle, key: &str, value: Self::Handle) {
        if let Some(fields) = object.as_object_mut() {
            fields.insert(key.to_string(), value);
        }
    }

    fn create_array(&mut self) -> Self::Handle {
        Value::Array(Vec::new())
    }

    fn add_array_element(&mut self, array: &mut Self::Handle, value: Self::Handle) {
        if let Some(items) = array.as_array_mut() {
            items.push(value);
        }
    }

    fn create_map(&mut self) -> Self::Handle {
        Value::Map(Vec::new())
    }

    fn add_map_property(&mut self, map: &mut Self::Handle, key: &str, value: Self::Handle) {
        if let Value::Map(entries) = map {
            Value::map_insert(entries, key, value);
        }
    }

    fn create_null(&mut self) -> Self::Handle {
        Value::Null
    }

    fn create_primitive(&mut self, value: Primitive) -> Self::Handle {
        value.into()
    }

    fn create_any(&mut self, value: &Value) -> Self::Handle {
        value.clone()
    }
}

/// Backend reading a raw [`Value`] tree
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueDeserializer;

impl Deserializer for ValueDeserializer {
    type Handle = Value;

    fn kind(&self, handle: &Self::Handle) -> HandleKind {
        match handle {
            Value::Null => HandleKind::Null,
            Value::Bool(_) => HandleKind::Bool,
            Value::Number(_) => HandleKind::Number,
            Value::String(_) | Value::Ref(_) => HandleKind::String,
            Value::Array(_) | Value::Set(_) => HandleKind::Array,
            Value::Object { .. } | Value::Map(_) | Value::Variant { .. } => HandleKind::Object,
        }
    }

    fn parse_primitive(&self, handle: &Self::Handle) -> Option<Primitive> {
        match handle {
            Value::Ref(r) => Some(Primitive::String(r.id.clone())),
            other => Primitive::from_value(other),
        }
    }

    fn object_property(&self, handle: &Self::Handle, key: &str) -> Option<Self::Handle> {
        match handle {
            Value::Variant { tag, value } => match key {
                "type" => Some(Value::String(tag.clone())),
                "value" => Some((**value).clone()),
                _ => None,
            },
            other => other.get(key).cloned(),
        }
    }

    fn array_elements(&self, handle: &Self::Handle) -> Option<Vec<Self::Handle>> {
        match handle {
            Value::Array(items) | Value::Set(items) => Some(items.clone()),
            _ => None,
        }
    }

    fn map_entries(&self, handle: &Self::Handle) -> Option<Vec<(String, Self::Handle)>> {
        match handle {
            Value::Map(entries) => Some(entries.clone()),
            Value::Object { fields, .. } => Some(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn parse_any(&self, handle: &Self::Handle) -> Value {
        handle.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_serializer_builds_tree() {
        let mut s = JsonSerializer;
        let mut obj = s.create_object();
        let mut arr = s.create_array();
        let one = s.create_primitive(Primitive::Number(1.0));
        s.add_array_element(&mut arr, one);
        s.add_object_property(&mut obj, "items", arr);
        assert_eq!(obj, serde_json::json!({"items": [1]}));
    }

    #[test]
    fn test_json_deserializer_reads_tree() {
        let d = JsonDeserializer;
        let handle = serde_json::json!({"a": "x", "b": [true]});
        assert_eq!(d.kind(&handle), HandleKind::Object);
        let a = d.object_property(&handle, "a").unwrap();
        assert_eq!(d.parse_primitive(&a), Some(Primitive::String("x".into())));
        assert!(d.object_property(&handle, "missing").is_none());
        let b = d.object_property(&handle, "b").unwrap();
        assert_eq!(d.array_elements(&b).map(|v| v.len()), Some(1));
    }

    #[test]
    fn test_value_backend_keeps_map_order() {
        let mut s = ValueSerializer;
        let mut map = s.create_map();
        let one = s.create_primitive(Primitive::Number(1.0));
        let two = s.create_primitive(Primitive::Number(2.0));
        s.add_map_property(&mut map, "z", one);
        s.add_map_property(&mut map, "a", two);

        let d = ValueDeserializer;
        let keys: Vec<_> = d
            .map_entries(&map)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["z", "a"]);
    }
}
