//! Schema type definitions
//!
//! A [`Type`] is an immutable, cheaply clonable schema node. Every type can
//! produce a default value, verify a runtime [`Value`], and translate between
//! values and wire handles through the [`Serializer`] / [`Deserializer`]
//! visitors. Copy-on-write helpers ([`Type::annotate`],
//! [`ObjectType::extend`](crate::ObjectType::extend)) derive new types
//! without touching existing ones.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::error::{ResultPathExt, SerializationError, SerializationResult};
use crate::object::ObjectType;
use crate::polymorphic::{GraphRefType, PolymorphicSerializer};
use crate::serializer::{
    Deserializer, HandleKind, JsonDeserializer, JsonSerializer, Primitive, Serializer,
};
use crate::union::UnionType;
use crate::value::{Value, number_to_json};

/// Factory producing the default for an optional type
pub type DefaultFactory = Arc<dyn Fn() -> Value + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Type Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Shape of a schema node
#[derive(Clone)]
pub enum TypeKind {
    Number,
    String,
    Boolean,
    /// String serialized through the serializer's atom hook
    Atom,
    /// Void, always null
    Empty,
    /// Untyped passthrough
    Any,
    Nullable {
        base: Type,
        /// Omit the property on serialize when the value is null
        skip_null_serialize: bool,
    },
    /// Missing or null input decodes to a default
    Optional {
        base: Type,
        default: Option<DefaultFactory>,
    },
    Array(Type),
    /// Unique values in insertion order, serialized as an array
    Set(Type),
    /// Ordered string keyed map
    Map(Type),
    /// String keyed record, decoded as an untyped object
    Record(Type),
    Object(ObjectType),
    /// Closed set of primitive literals
    Enum(Vec<Value>),
    /// Wire form `{"type": tag, "value": payload}`
    TaggedUnion(Vec<(String, Type)>),
    /// Wire form `{tag: payload}`
    ByKeyProperty(Vec<(String, Type)>),
    /// Object variants carrying their tag inline under `key`
    ByKeyUnion {
        key: String,
        variants: Vec<(String, Type)>,
    },
    Union(UnionType),
    Polymorphic(PolymorphicSerializer),
    GraphRef(GraphRefType),
    /// Forward reference used to build recursive types
    Lazy(Arc<OnceLock<Type>>),
}

// ─────────────────────────────────────────────────────────────────────────────
// Type
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable schema definition
#[derive(Clone)]
pub struct Type(Arc<TypeInner>);

#[derive(Clone)]
struct TypeInner {
    name: String,
    kind: TypeKind,
    annotations: BTreeMap<String, Value>,
}

impl std::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Type({})", self.0.name)
    }
}

impl Type {
    pub(crate) fn from_kind(name: impl Into<String>, kind: TypeKind) -> Self {
        Self(Arc::new(TypeInner {
            name: name.into(),
            kind,
            annotations: BTreeMap::new(),
        }))
    }

    pub fn number() -> Self {
        Self::from_kind("number", TypeKind::Number)
    }

    pub fn string() -> Self {
        Self::from_kind("string", TypeKind::String)
    }

    pub fn boolean() -> Self {
        Self::from_kind("boolean", TypeKind::Boolean)
    }

    pub fn atom() -> Self {
        Self::from_kind("atom", TypeKind::Atom)
    }

    pub fn empty() -> Self {
        Self::from_kind("void", TypeKind::Empty)
    }

    pub fn any() -> Self {
        Self::from_kind("any", TypeKind::Any)
    }

    /// Accept null in addition to the base type
    pub fn nullable(base: Type) -> Self {
        Self::from_kind(
            format!("{}?", base.name()),
            TypeKind::Nullable {
                base,
                skip_null_serialize: false,
            },
        )
    }

    /// Nullable whose null value is omitted from serialized objects
    ///
    /// A missing key still decodes to null.
    pub fn nullable_skip(base: Type) -> Self {
        Self::from_kind(
            format!("{}?", base.name()),
            TypeKind::Nullable {
                base,
                skip_null_serialize: true,
            },
        )
    }

    /// Missing or null input decodes to the base type's default
    pub fn optional(base: Type) -> Self {
        Self::from_kind(
            base.name().to_string(),
            TypeKind::Optional {
                base,
                default: None,
            },
        )
    }

    /// Missing or null input decodes to the value produced by `default`
    pub fn optional_with<F>(base: Type, default: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self::from_kind(
            base.name().to_string(),
            TypeKind::Optional {
                base,
                default: Some(Arc::new(default)),
            },
        )
    }

    pub fn array(element: Type) -> Self {
        Self::from_kind(format!("{}[]", element.name()), TypeKind::Array(element))
    }

    pub fn set(element: Type) -> Self {
        Self::from_kind(format!("Set<{}>", element.name()), TypeKind::Set(element))
    }

    pub fn map(element: Type) -> Self {
        Self::from_kind(format!("Map<{}>", element.name()), TypeKind::Map(element))
    }

    pub fn record(element: Type) -> Self {
        Self::from_kind(format!("{}[:]", element.name()), TypeKind::Record(element))
    }

    /// Anonymous object type
    pub fn object<K: Into<String>>(props: impl IntoIterator<Item = (K, Type)>) -> Self {
        Self::from_object(ObjectType::new(None, props))
    }

    /// Named object type, decoded values carry the name as their `type_id`
    pub fn named<K: Into<String>>(
        name: impl Into<String>,
        props: impl IntoIterator<Item = (K, Type)>,
    ) -> Self {
        Self::from_object(ObjectType::new(Some(name.into()), props))
    }

    pub fn from_object(object: ObjectType) -> Self {
        let name = object.name().unwrap_or("object").to_string();
        Self::from_kind(name, TypeKind::Object(object))
    }

    /// Closed set of primitive literals, the first entry is the default
    pub fn enumeration<V: Into<Value>>(entries: impl IntoIterator<Item = V>) -> Self {
        let entries: Vec<Value> = entries.into_iter().map(Into::into).collect();
        let name = entries
            .iter()
            .map(literal_name)
            .collect::<Vec<_>>()
            .join(" | ");
        Self::from_kind(name, TypeKind::Enum(entries))
    }

    /// Closed set of string literals
    pub fn string_union<S: Into<String>>(entries: impl IntoIterator<Item = S>) -> Self {
        Self::enumeration(entries.into_iter().map(|s| Value::String(s.into())))
    }

    /// Variants encoded as `{"type": tag, "value": payload}`
    pub fn tagged_union<K: Into<String>>(
        name: impl Into<String>,
        variants: impl IntoIterator<Item = (K, Type)>,
    ) -> Self {
        Self::from_kind(name, TypeKind::TaggedUnion(collect_variants(variants)))
    }

    /// Variants encoded as a single-key object `{tag: payload}`
    pub fn by_key_property<K: Into<String>>(
        name: impl Into<String>,
        variants: impl IntoIterator<Item = (K, Type)>,
    ) -> Self {
        Self::from_kind(name, TypeKind::ByKeyProperty(collect_variants(variants)))
    }

    /// Object variants whose tag is stored inline under `key`
    pub fn by_key_union<K: Into<String>>(
        name: impl Into<String>,
        key: impl Into<String>,
        variants: impl IntoIterator<Item = (K, Type)>,
    ) -> Self {
        Self::from_kind(
            name,
            TypeKind::ByKeyUnion {
                key: key.into(),
                variants: collect_variants(variants),
            },
        )
    }

    /// Build a self-referencing type
    ///
    /// `build` receives a forward reference that resolves to the returned type.
    /// The reference holds the defined type strongly, so a recursive type is
    /// never freed; define it once and share it.
    pub fn recursive(name: impl Into<String>, build: impl FnOnce(&Type) -> Type) -> Self {
        let (handle, cell) = Self::deferred(name);
        let resolved = build(&handle);
        let _ = cell.set(resolved.clone());
        resolved
    }

    pub(crate) fn deferred(name: impl Into<String>) -> (Type, Arc<OnceLock<Type>>) {
        let cell = Arc::new(OnceLock::new());
        (Self::from_kind(name, TypeKind::Lazy(cell.clone())), cell)
    }

    /// Copy of this type carrying an extra annotation
    pub fn annotate(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut inner = (*self.0).clone();
        inner.annotations.insert(key.into(), value.into());
        Self(Arc::new(inner))
    }

    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.0.annotations.get(key)
    }

    /// Apply a type factory, e.g. `Type::string().map_type(Type::array)`
    pub fn map_type<R>(self, factory: impl FnOnce(Type) -> R) -> R {
        factory(self)
    }
}

fn collect_variants<K: Into<String>>(
    variants: impl IntoIterator<Item = (K, Type)>,
) -> Vec<(String, Type)> {
    variants.into_iter().map(|(k, t)| (k.into(), t)).collect()
}

fn find_variant<'a>(variants: &'a [(String, Type)], tag: &str) -> Option<&'a Type> {
    variants.iter().find(|(t, _)| t == tag).map(|(_, ty)| ty)
}

fn literal_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => number_to_json(*n).to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.kind_name().to_string(),
    }
}

fn unknown_variant(tag: &str) -> SerializationError {
    SerializationError::new(format!("Unknown variant \"{tag}\""))
}

// ─────────────────────────────────────────────────────────────────────────────
// Introspection
// ─────────────────────────────────────────────────────────────────────────────

impl Type {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    /// Multi-line schema description
    pub fn definition(&self) -> String {
        self.get_definition("")
    }

    pub(crate) fn get_definition(&self, indent: &str) -> String {
        match self.kind() {
            TypeKind::Nullable { base, .. } => format!("{}?", base.get_definition(indent)),
            TypeKind::Optional { base, .. } => base.get_definition(indent),
            TypeKind::Array(element) => format!("{}[]", element.get_definition(indent)),
            TypeKind::Record(element) => format!("{}[:]", element.get_definition(indent)),
            TypeKind::Set(element) => format!("Set<{}>", element.get_definition(indent)),
            TypeKind::Map(element) => format!("Map<{}>", element.get_definition(indent)),
            TypeKind::Object(object) => object.get_definition(indent),
            _ => self.name().to_string(),
        }
    }

    /// Follow forward references to the defined type
    pub fn resolve(&self) -> Type {
        let mut current = self.clone();
        while let TypeKind::Lazy(cell) = current.kind() {
            match cell.get() {
                Some(inner) => current = inner.clone(),
                None => break,
            }
        }
        current
    }

    /// Strip nullable, optional and forward reference wrappers
    pub fn strip_nullable(&self) -> Type {
        let resolved = self.resolve();
        match resolved.kind() {
            TypeKind::Nullable { base, .. } | TypeKind::Optional { base, .. } => {
                base.strip_nullable()
            }
            _ => resolved,
        }
    }

    pub fn as_object(&self) -> Option<ObjectType> {
        match self.resolve().kind() {
            TypeKind::Object(object) => Some(object.clone()),
            _ => None,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(
            self.resolve().kind(),
            TypeKind::Nullable { .. } | TypeKind::Optional { .. } | TypeKind::Empty
        )
    }

    /// Nullable type that omits null properties when serialized
    pub(crate) fn skips_null(&self) -> bool {
        matches!(
            self.resolve().kind(),
            TypeKind::Nullable {
                skip_null_serialize: true,
                ..
            }
        )
    }

    fn lazy_target(&self, cell: &OnceLock<Type>) -> SerializationResult<Type> {
        cell.get().cloned().ok_or_else(|| {
            SerializationError::new(format!(
                "Recursive type \"{}\" used before it was defined",
                self.name()
            ))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Defaults & Verification
// ─────────────────────────────────────────────────────────────────────────────

impl Type {
    pub fn default_value(&self) -> Value {
        match self.kind() {
            TypeKind::Number => Value::Number(0.0),
            TypeKind::String | TypeKind::Atom => Value::String(String::new()),
            TypeKind::Boolean => Value::Bool(false),
            TypeKind::Empty | TypeKind::Any | TypeKind::Nullable { .. } => Value::Null,
            TypeKind::Optional { base, default } => match default {
                Some(factory) => factory(),
                None => base.default_value(),
            },
            TypeKind::Array(_) => Value::Array(Vec::new()),
            TypeKind::Set(_) => Value::Set(Vec::new()),
            TypeKind::Map(_) => Value::Map(Vec::new()),
            TypeKind::Record(_) => Value::object(BTreeMap::new()),
            TypeKind::Object(object) => object.default_value(),
            TypeKind::Enum(entries) => entries.first().cloned().unwrap_or_default(),
            TypeKind::TaggedUnion(variants) | TypeKind::ByKeyProperty(variants) => variants
                .first()
                .map(|(tag, ty)| Value::variant(tag.clone(), ty.default_value()))
                .unwrap_or_default(),
            TypeKind::ByKeyUnion { key, variants } => match variants.first() {
                Some((tag, ty)) => {
                    let mut value = ty.default_value();
                    if let Some(fields) = value.as_object_mut() {
                        fields.insert(key.clone(), Value::String(tag.clone()));
                    }
                    value
                }
                None => Value::Null,
            },
            TypeKind::Union(union) => union.default_value(),
            TypeKind::Polymorphic(_) | TypeKind::GraphRef(_) => Value::Null,
            TypeKind::Lazy(cell) => cell.get().map(Type::default_value).unwrap_or_default(),
        }
    }

    /// Value decoded for an absent object property
    pub(crate) fn decode_missing(&self) -> SerializationResult<Value> {
        match self.kind() {
            TypeKind::Nullable { .. } | TypeKind::Empty | TypeKind::Any => Ok(Value::Null),
            TypeKind::Optional { .. } => Ok(self.default_value()),
            TypeKind::Lazy(cell) => self.lazy_target(cell)?.decode_missing(),
            _ => Err(SerializationError::expected(self.name())),
        }
    }

    /// Check that a runtime value conforms to this type
    pub fn verify(&self, value: &Value) -> SerializationResult<()> {
        match (self.kind(), value) {
            (TypeKind::Number, Value::Number(_)) => Ok(()),
            (TypeKind::String | TypeKind::Atom, Value::String(_)) => Ok(()),
            (TypeKind::Boolean, Value::Bool(_)) => Ok(()),
            (TypeKind::Empty, Value::Null) => Ok(()),
            (TypeKind::Any, _) => Ok(()),
            (TypeKind::Nullable { .. } | TypeKind::Optional { .. }, Value::Null) => Ok(()),
            (TypeKind::Nullable { base, .. } | TypeKind::Optional { base, .. }, _) => {
                base.verify(value)
            }
            (TypeKind::Array(element), Value::Array(items))
            | (TypeKind::Set(element), Value::Set(items)) => {
                for (index, item) in items.iter().enumerate() {
                    element.verify(item).at(index)?;
                }
                Ok(())
            }
            (TypeKind::Map(element), Value::Map(entries)) => {
                for (key, item) in entries {
                    element.verify(item).at(key)?;
                }
                Ok(())
            }
            (TypeKind::Record(element), Value::Object { fields, .. }) => {
                for (key, item) in fields {
                    element.verify(item).at(key)?;
                }
                Ok(())
            }
            (TypeKind::Object(object), _) => object.verify(value),
            (TypeKind::Enum(entries), _) if entries.contains(value) => Ok(()),
            (
                TypeKind::TaggedUnion(variants) | TypeKind::ByKeyProperty(variants),
                Value::Variant { tag, value },
            ) => find_variant(variants, tag)
                .ok_or_else(|| unknown_variant(tag))?
                .verify(value)
                .at(tag),
            (TypeKind::ByKeyUnion { key, variants }, Value::Object { fields, .. }) => {
                let tag = fields
                    .get(key)
                    .and_then(Value::as_str)
                    .ok_or_else(|| SerializationError::expected("string").append_path(key))?;
                find_variant(variants, tag)
                    .ok_or_else(|| unknown_variant(tag).append_path(key))?
                    .verify(value)
            }
            (TypeKind::Union(union), _) => union.verify(value),
            (TypeKind::Polymorphic(poly), _) => poly.verify(value),
            (TypeKind::GraphRef(_), Value::Ref(_)) => Ok(()),
            (TypeKind::Lazy(cell), _) => self.lazy_target(cell)?.verify(value),
            _ => Err(SerializationError::expected(self.name())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Serialization
// ─────────────────────────────────────────────────────────────────────────────

impl Type {
    /// Serialize into a JSON tree
    pub fn serialize(&self, value: &Value) -> SerializationResult<serde_json::Value> {
        self.serialize_with(value, &mut JsonSerializer)
    }

    /// Deserialize from a JSON tree
    pub fn deserialize(&self, handle: &serde_json::Value) -> SerializationResult<Value> {
        self.deserialize_with(handle, &JsonDeserializer)
    }

    pub fn serialize_with<S: Serializer>(
        &self,
        value: &Value,
        s: &mut S,
    ) -> SerializationResult<S::Handle> {
        match (self.kind(), value) {
            (TypeKind::Number, Value::Number(n)) => Ok(s.create_primitive(Primitive::Number(*n))),
            (TypeKind::String, Value::String(v)) => {
                Ok(s.create_primitive(Primitive::String(v.clone())))
            }
            (TypeKind::Boolean, Value::Bool(b)) => Ok(s.create_primitive(Primitive::Bool(*b))),
            (TypeKind::Atom, Value::String(v)) => Ok(s.create_atom(v)),
            (TypeKind::Empty, _) => Ok(s.create_null()),
            (TypeKind::Any, _) => Ok(s.create_any(value)),
            (TypeKind::Nullable { .. }, Value::Null) => Ok(s.create_null()),
            (TypeKind::Nullable { base, .. }, _) => base.serialize_with(value, s),
            (TypeKind::Optional { base, .. }, Value::Null) => match self.default_value() {
                Value::Null => Ok(s.create_null()),
                default => base.serialize_with(&default, s),
            },
            (TypeKind::Optional { base, .. }, _) => base.serialize_with(value, s),
            (TypeKind::Array(element), Value::Array(items))
            | (TypeKind::Set(element), Value::Set(items) | Value::Array(items)) => {
                let mut array = s.create_array();
                for (index, item) in items.iter().enumerate() {
                    let handle = element.serialize_with(item, s).at(index)?;
                    s.add_array_element(&mut array, handle);
                }
                Ok(array)
            }
            (TypeKind::Map(element) | TypeKind::Record(element), Value::Map(entries)) => {
                let mut map = s.create_map();
                for (key, item) in entries {
                    let handle = element.serialize_with(item, s).at(key)?;
                    s.add_map_property(&mut map, key, handle);
                }
                Ok(map)
            }
            (TypeKind::Map(element) | TypeKind::Record(element), Value::Object { fields, .. }) => {
                let mut map = s.create_map();
                for (key, item) in fields {
                    let handle = element.serialize_with(item, s).at(key)?;
                    s.add_map_property(&mut map, key, handle);
                }
                Ok(map)
            }
            (TypeKind::Object(object), _) => object.serialize_with(value, s),
            (TypeKind::Enum(entries), _) if entries.contains(value) => {
                match Primitive::from_value(value) {
                    Some(primitive) => Ok(s.create_primitive(primitive)),
                    None => Err(SerializationError::expected(self.name())),
                }
            }
            (TypeKind::TaggedUnion(variants), Value::Variant { tag, value }) => {
                let ty = find_variant(variants, tag).ok_or_else(|| unknown_variant(tag))?;
                let payload = ty.serialize_with(value, s).at(tag)?;
                let tag_handle = s.create_primitive(Primitive::String(tag.clone()));
                let mut object = s.create_object();
                s.add_object_property(&mut object, "type", tag_handle);
                s.add_object_property(&mut object, "value", payload);
                Ok(object)
            }
            (TypeKind::ByKeyProperty(variants), Value::Variant { tag, value }) => {
                let ty = find_variant(variants, tag).ok_or_else(|| unknown_variant(tag))?;
                let payload = ty.serialize_with(value, s).at(tag)?;
                let mut object = s.create_object();
                s.add_object_property(&mut object, tag, payload);
                Ok(object)
            }
            (TypeKind::ByKeyUnion { key, variants }, Value::Object { fields, .. }) => {
                let tag = fields
                    .get(key)
                    .and_then(Value::as_str)
                    .ok_or_else(|| SerializationError::expected("string").append_path(key))?;
                let ty = find_variant(variants, tag)
                    .ok_or_else(|| unknown_variant(tag).append_path(key))?;
                let mut object = ty.serialize_with(value, s)?;
                let tag_handle = s.create_primitive(Primitive::String(tag.to_string()));
                s.add_object_property(&mut object, key, tag_handle);
                Ok(object)
            }
            (TypeKind::Union(union), _) => union.serialize_with(value, s),
            (TypeKind::Polymorphic(poly), _) => poly.serialize_with(value, s),
            (TypeKind::GraphRef(graph_ref), _) => graph_ref.serialize_with(value, s),
            (TypeKind::Lazy(cell), _) => self.lazy_target(cell)?.serialize_with(value, s),
            _ => Err(SerializationError::expected(self.name())),
        }
    }

    pub fn deserialize_with<D: Deserializer>(
        &self,
        handle: &D::Handle,
        d: &D,
    ) -> SerializationResult<Value> {
        match self.kind() {
            TypeKind::Number => match d.parse_primitive(handle) {
                Some(Primitive::Number(n)) => Ok(Value::Number(n)),
                _ => Err(SerializationError::expected("number")),
            },
            TypeKind::String => match d.parse_primitive(handle) {
                Some(Primitive::String(v)) => Ok(Value::String(v)),
                _ => Err(SerializationError::expected("string")),
            },
            TypeKind::Boolean => match d.parse_primitive(handle) {
                Some(Primitive::Bool(b)) => Ok(Value::Bool(b)),
                _ => Err(SerializationError::expected("boolean")),
            },
            TypeKind::Atom => d
                .parse_atom(handle)
                .map(Value::String)
                .ok_or_else(|| SerializationError::expected("atom")),
            TypeKind::Empty => Ok(Value::Null),
            TypeKind::Any => Ok(d.parse_any(handle)),
            TypeKind::Nullable { base, .. } => {
                if d.is_null(handle) {
                    Ok(Value::Null)
                } else {
                    base.deserialize_with(handle, d)
                }
            }
            TypeKind::Optional { base, .. } => {
                if d.is_null(handle) {
                    Ok(self.default_value())
                } else {
                    base.deserialize_with(handle, d)
                }
            }
            TypeKind::Array(element) => {
                let items = d
                    .array_elements(handle)
                    .ok_or_else(|| SerializationError::expected("array"))?;
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    out.push(element.deserialize_with(item, d).at(index)?);
                }
                Ok(Value::Array(out))
            }
            TypeKind::Set(element) => {
                let items = d
                    .array_elements(handle)
                    .ok_or_else(|| SerializationError::expected("array"))?;
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    Value::set_insert(&mut out, element.deserialize_with(item, d).at(index)?);
                }
                Ok(Value::Set(out))
            }
            TypeKind::Map(element) => {
                let entries = d
                    .map_entries(handle)
                    .ok_or_else(|| SerializationError::expected("object"))?;
                let mut out = Vec::with_capacity(entries.len());
                for (key, item) in entries {
                    let value = element.deserialize_with(&item, d).at(&key)?;
                    Value::map_insert(&mut out, key, value);
                }
                Ok(Value::Map(out))
            }
            TypeKind::Record(element) => {
                let entries = d
                    .map_entries(handle)
                    .ok_or_else(|| SerializationError::expected("object"))?;
                let mut fields = BTreeMap::new();
                for (key, item) in entries {
                    let value = element.deserialize_with(&item, d).at(&key)?;
                    fields.insert(key, value);
                }
                Ok(Value::object(fields))
            }
            TypeKind::Object(object) => object.deserialize_with(handle, d),
            TypeKind::Enum(entries) => {
                let value = d
                    .parse_primitive(handle)
                    .map(Value::from)
                    .ok_or_else(|| SerializationError::expected(self.name()))?;
                if entries.contains(&value) {
                    Ok(value)
                } else {
                    Err(SerializationError::expected(self.name()))
                }
            }
            TypeKind::TaggedUnion(variants) => {
                if d.kind(handle) != HandleKind::Object {
                    return Err(SerializationError::expected("object"));
                }
                let tag = d
                    .object_property(handle, "type")
                    .and_then(|h| d.parse_atom(&h))
                    .ok_or_else(|| SerializationError::expected("string").append_path("type"))?;
                let ty = find_variant(variants, &tag)
                    .ok_or_else(|| unknown_variant(&tag).append_path("type"))?;
                let payload = match d.object_property(handle, "value") {
                    Some(h) => ty.deserialize_with(&h, d),
                    None => ty.decode_missing(),
                }
                .at("value")?;
                Ok(Value::variant(tag, payload))
            }
            TypeKind::ByKeyProperty(variants) => {
                let entries = d
                    .map_entries(handle)
                    .ok_or_else(|| SerializationError::expected("object"))?;
                let [(tag, payload)]: [(String, D::Handle); 1] = entries.try_into().map_err(|_| {
                    SerializationError::new(format!(
                        "Expected a single variant key for \"{}\"",
                        self.name()
                    ))
                })?;
                let ty = find_variant(variants, &tag).ok_or_else(|| unknown_variant(&tag))?;
                let value = ty.deserialize_with(&payload, d).at(&tag)?;
                Ok(Value::variant(tag, value))
            }
            TypeKind::ByKeyUnion { key, variants } => {
                if d.kind(handle) != HandleKind::Object {
                    return Err(SerializationError::expected("object"));
                }
                let tag = d
                    .object_property(handle, key)
                    .and_then(|h| d.parse_atom(&h))
                    .ok_or_else(|| SerializationError::expected("string").append_path(key))?;
                let ty = find_variant(variants, &tag)
                    .ok_or_else(|| unknown_variant(&tag).append_path(key))?;
                let mut value = ty.deserialize_with(handle, d)?;
                if let Some(fields) = value.as_object_mut() {
                    fields.insert(key.clone(), Value::String(tag));
                }
                Ok(value)
            }
            TypeKind::Union(union) => union.deserialize_with(handle, d),
            TypeKind::Polymorphic(poly) => poly.deserialize_with(handle, d),
            TypeKind::GraphRef(graph_ref) => graph_ref.deserialize_with(handle, d),
            TypeKind::Lazy(cell) => self.lazy_target(cell)?.deserialize_with(handle, d),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
