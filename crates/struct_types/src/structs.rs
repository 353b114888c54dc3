//! Named structs bound to typed instances

use crate::error::{SerializationError, SerializationResult};
use crate::object::{Migration, ObjectType};
use crate::types::{Type, TypeKind};
use crate::value::Value;

/// Named object type whose instances are `Value::Object` tagged with its name
#[derive(Clone, Debug)]
pub struct Struct {
    ty: Type,
    object: ObjectType,
}

impl Struct {
    /// Define a struct from an ordered property list
    pub fn define<K: Into<String>>(
        name: impl Into<String>,
        props: impl IntoIterator<Item = (K, Type)>,
    ) -> Self {
        Self::from_object(ObjectType::new(Some(name.into()), props))
    }

    /// Define a struct whose properties refer back to the struct itself
    pub fn define_recursive<K, P>(name: impl Into<String>, props: impl FnOnce(&Type) -> P) -> Self
    where
        K: Into<String>,
        P: IntoIterator<Item = (K, Type)>,
    {
        let name = name.into();
        let (handle, cell) = Type::deferred(name.clone());
        let this = Self::from_object(ObjectType::new(Some(name), props(&handle)));
        let _ = cell.set(this.ty.clone());
        this
    }

    fn from_object(object: ObjectType) -> Self {
        Self {
            ty: Type::from_object(object.clone()),
            object,
        }
    }

    /// Copy of this struct with versioned migrations
    pub fn with_migrations(&self, migrations: impl IntoIterator<Item = Migration>) -> Self {
        Self::from_object(self.object.with_migrations(migrations))
    }

    /// Derive a struct with additional or replaced properties
    pub fn extend<K: Into<String>>(
        &self,
        name: impl Into<String>,
        props: impl IntoIterator<Item = (K, Type)>,
    ) -> Self {
        Self::from_object(self.object.extend(Some(name.into()), props))
    }

    pub fn name(&self) -> &str {
        self.ty.name()
    }

    pub fn base_type(&self) -> &Type {
        &self.ty
    }

    pub fn object_type(&self) -> &ObjectType {
        &self.object
    }

    /// Type to embed this struct in another schema
    pub fn reference(&self) -> Type {
        self.ty.clone()
    }

    pub fn default_value(&self) -> Value {
        self.object.default_value()
    }

    /// Create an instance from the given fields, defaulting the rest
    pub fn instantiate<K, V>(
        &self,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> SerializationResult<Value>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut instance = self.default_value();
        if let Some(slots) = instance.as_object_mut() {
            for (key, value) in fields {
                let key = key.into();
                if self.object.prop(&key).is_none() {
                    return Err(SerializationError::new(format!(
                        "Struct \"{}\" has no property \"{key}\"",
                        self.name()
                    )));
                }
                slots.insert(key, value.into());
            }
        }
        self.verify(&instance)?;
        Ok(instance)
    }

    /// Whether the value was created from this struct
    pub fn is_instance(&self, value: &Value) -> bool {
        value.object_type_id() == Some(self.name())
    }

    pub fn verify(&self, value: &Value) -> SerializationResult<()> {
        self.ty.verify(value)
    }

    pub fn serialize(&self, value: &Value) -> SerializationResult<serde_json::Value> {
        self.ty.serialize(value)
    }

    pub fn deserialize(&self, handle: &serde_json::Value) -> SerializationResult<Value> {
        self.ty.deserialize(handle)
    }
}

impl TryFrom<Type> for Struct {
    type Error = SerializationError;

    fn try_from(ty: Type) -> Result<Self, Self::Error> {
        match ty.resolve().kind() {
            TypeKind::Object(object) if object.name().is_some() => Ok(Self {
                ty: ty.resolve(),
                object: object.clone(),
            }),
            _ => Err(SerializationError::new(format!(
                "Type \"{}\" is not a named object",
                ty.name()
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn track() -> Struct {
        Struct::define(
            "Track",
            [("name", Type::string()), ("length", Type::number())],
        )
    }

    #[test]
    fn test_default_instance_is_typed() {
        let value = track().default_value();
        assert!(track().is_instance(&value));
        assert_eq!(value.get("name"), Some(&Value::from("")));
    }

    #[test]
    fn test_instantiate_overrides_defaults() {
        let value = track().instantiate([("name", "Intro")]).unwrap();
        assert_eq!(value.get("name"), Some(&Value::from("Intro")));
        assert_eq!(value.get("length"), Some(&Value::from(0)));

        let err = track().instantiate([("name", 5)]).unwrap_err();
        assert_eq!(err.to_string(), "Expected string at .name");
        assert!(track().instantiate([("genre", "x")]).is_err());
    }

    #[test]
    fn test_round_trip() {
        let playlist = Struct::define(
            "Playlist",
            [
                ("name", Type::string()),
                ("icon", Type::nullable(Type::string())),
                ("tracks", Type::array(track().reference())),
            ],
        );
        let wire = json!({
            "name": "Mix",
            "icon": null,
            "tracks": [{"name": "a", "length": 1}, {"name": "b", "length": 2}]
        });
        let value = playlist.deserialize(&wire).unwrap();
        assert_eq!(playlist.serialize(&value).unwrap(), wire);
        assert_eq!(playlist.deserialize(&playlist.serialize(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_recursive_struct() {
        let node = Struct::define_recursive("Node", |this| {
            [
                ("value", Type::number()),
                ("next", Type::nullable(this.clone())),
            ]
        });
        let wire = json!({"value": 1, "next": {"value": 2, "next": null}});
        let value = node.deserialize(&wire).unwrap();
        assert_eq!(
            value.get("next").and_then(|n| n.get("value")),
            Some(&Value::from(2))
        );
        assert_eq!(node.serialize(&value).unwrap(), wire);
    }

    #[test]
    fn test_extend_keeps_base_props() {
        let live = track().extend("LiveTrack", [("venue", Type::string())]);
        let value = live.default_value();
        assert_eq!(value.object_type_id(), Some("LiveTrack"));
        assert_eq!(value.len(), Some(3));
    }

    #[test]
    fn test_try_from_type() {
        assert!(Struct::try_from(track().reference()).is_ok());
        assert!(Struct::try_from(Type::object([("x", Type::number())])).is_err());
    }
}
