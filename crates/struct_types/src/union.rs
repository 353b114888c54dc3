//! Tag-free unions
//!
//! A [`UnionType`] picks the member to use from the shape of the value
//! itself. Every member has to be distinguishable by shape alone, which is
//! checked once when the union is built.

use std::sync::Arc;

use crate::error::{SerializationError, SerializationResult, UnionDiscriminationError};
use crate::serializer::{Deserializer, HandleKind, Primitive, Serializer};
use crate::types::{Type, TypeKind};
use crate::value::Value;

/// Object members discriminated by a single-value enum property
#[derive(Clone)]
struct ObjectDiscriminator {
    key: String,
    by_tag: Vec<(Value, Type)>,
}

#[derive(Clone, Default)]
struct Matcher {
    null: Option<Type>,
    boolean: Option<Type>,
    number: Option<Type>,
    string: Option<Type>,
    array: Option<Type>,
    map: Option<Type>,
    fallback: Option<Type>,
    constants: Vec<(Value, Type)>,
    objects: Vec<Type>,
    discriminator: Option<ObjectDiscriminator>,
}

/// Union of arbitrary members discriminated by value shape
#[derive(Clone)]
pub struct UnionType {
    inner: Arc<UnionInner>,
}

struct UnionInner {
    members: Vec<Type>,
    matcher: Matcher,
}

fn ambiguous(a: &Type, b: &Type) -> UnionDiscriminationError {
    UnionDiscriminationError(format!(
        "Unable to discriminate between \"{}\" and \"{}\"",
        a.name(),
        b.name()
    ))
}

fn claim(slot: &mut Option<Type>, member: &Type) -> Result<(), UnionDiscriminationError> {
    match slot {
        Some(existing) => Err(ambiguous(existing, member)),
        None => {
            *slot = Some(member.clone());
            Ok(())
        }
    }
}

impl Matcher {
    fn add(&mut self, member: &Type) -> Result<(), UnionDiscriminationError> {
        let resolved = member.resolve();
        match resolved.kind() {
            TypeKind::Nullable { base, .. } | TypeKind::Optional { base, .. } => {
                claim(&mut self.null, member)?;
                self.add(base)
            }
            TypeKind::Empty => claim(&mut self.null, member),
            TypeKind::Boolean => claim(&mut self.boolean, member),
            TypeKind::Number => claim(&mut self.number, member),
            TypeKind::String | TypeKind::Atom | TypeKind::GraphRef(_) => {
                claim(&mut self.string, member)
            }
            TypeKind::Array(_) | TypeKind::Set(_) => claim(&mut self.array, member),
            TypeKind::Map(_) | TypeKind::Record(_) => claim(&mut self.map, member),
            TypeKind::Any => claim(&mut self.fallback, member),
            TypeKind::Enum(entries) => {
                for entry in entries {
                    if let Some((_, existing)) = self.constants.iter().find(|(v, _)| v == entry) {
                        return Err(ambiguous(existing, member));
                    }
                    self.constants.push((entry.clone(), member.clone()));
                }
                Ok(())
            }
            TypeKind::Object(_) => {
                self.objects.push(member.clone());
                Ok(())
            }
            _ => Err(UnionDiscriminationError(format!(
                "Type \"{}\" cannot be a member of a union",
                member.name()
            ))),
        }
    }

    fn build_discriminator(&mut self) -> Result<(), UnionDiscriminationError> {
        if self.objects.len() < 2 {
            return Ok(());
        }

        let first = self.objects[0].as_object();
        let key = first
            .iter()
            .flat_map(|o| o.props().iter())
            .find(|(_, ty)| single_constant(ty).is_some())
            .map(|(key, _)| key.clone())
            .ok_or_else(|| {
                UnionDiscriminationError(
                    "Unable to find a discriminator property for object types".to_string(),
                )
            })?;

        let mut by_tag: Vec<(Value, Type)> = Vec::with_capacity(self.objects.len());
        for member in &self.objects {
            let constant = member
                .as_object()
                .and_then(|o| o.prop(&key).and_then(single_constant))
                .ok_or_else(|| {
                    UnionDiscriminationError(format!(
                        "Type \"{}\" lacks the discriminator property \"{key}\"",
                        member.name()
                    ))
                })?;
            if let Some((_, existing)) = by_tag.iter().find(|(v, _)| *v == constant) {
                return Err(ambiguous(existing, member));
            }
            by_tag.push((constant, member.clone()));
        }

        self.discriminator = Some(ObjectDiscriminator { key, by_tag });
        Ok(())
    }

    fn for_value(&self, value: &Value) -> Option<&Type> {
        let by_shape = match value {
            Value::Null => self.null.as_ref(),
            Value::Bool(_) => self.constant(value).or(self.boolean.as_ref()),
            Value::Number(_) => self.constant(value).or(self.number.as_ref()),
            Value::String(_) | Value::Ref(_) => self.constant(value).or(self.string.as_ref()),
            Value::Array(_) | Value::Set(_) => self.array.as_ref(),
            Value::Map(_) => self.map.as_ref(),
            Value::Object { fields, .. } => {
                let object = match &self.discriminator {
                    Some(disc) => fields.get(&disc.key).and_then(|tag| disc.lookup(tag)),
                    None => self.objects.first().filter(|_| self.objects.len() == 1),
                };
                object.or(self.map.as_ref())
            }
            Value::Variant { .. } => None,
        };
        by_shape.or(self.fallback.as_ref())
    }

    fn for_handle<D: Deserializer>(&self, handle: &D::Handle, d: &D) -> Option<&Type> {
        let by_shape = match d.kind(handle) {
            HandleKind::Null => self.null.as_ref(),
            HandleKind::Bool | HandleKind::Number | HandleKind::String => {
                let primitive = d.parse_primitive(handle);
                let constant = primitive.clone().and_then(|p| self.constant(&Value::from(p)));
                constant.or(match primitive {
                    Some(Primitive::Bool(_)) => self.boolean.as_ref(),
                    Some(Primitive::Number(_)) => self.number.as_ref(),
                    Some(Primitive::String(_)) => self.string.as_ref(),
                    None => None,
                })
            }
            HandleKind::Array => self.array.as_ref(),
            HandleKind::Object => {
                let object = match &self.discriminator {
                    Some(disc) => d
                        .object_property(handle, &disc.key)
                        .and_then(|h| d.parse_primitive(&h))
                        .and_then(|p| disc.lookup(&Value::from(p))),
                    None => self.objects.first().filter(|_| self.objects.len() == 1),
                };
                object.or(self.map.as_ref())
            }
        };
        by_shape.or(self.fallback.as_ref())
    }

    fn constant(&self, value: &Value) -> Option<&Type> {
        self.constants
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, ty)| ty)
    }
}

impl ObjectDiscriminator {
    fn lookup(&self, tag: &Value) -> Option<&Type> {
        self.by_tag.iter().find(|(v, _)| v == tag).map(|(_, ty)| ty)
    }
}

/// The literal of a single-entry enum
fn single_constant(ty: &Type) -> Option<Value> {
    match ty.resolve().kind() {
        TypeKind::Enum(entries) if entries.len() == 1 => entries.first().cloned(),
        _ => None,
    }
}

impl UnionType {
    /// Build a union type, failing if two members share a shape
    pub fn new(members: impl IntoIterator<Item = Type>) -> Result<Type, UnionDiscriminationError> {
        let members: Vec<Type> = members.into_iter().collect();
        let mut matcher = Matcher::default();
        for member in &members {
            matcher.add(member)?;
        }
        matcher.build_discriminator()?;

        let name = members
            .iter()
            .map(Type::name)
            .collect::<Vec<_>>()
            .join(" | ");
        let union = UnionType {
            inner: Arc::new(UnionInner { members, matcher }),
        };
        Ok(Type::from_kind(name, TypeKind::Union(union)))
    }

    pub fn members(&self) -> &[Type] {
        &self.inner.members
    }

    pub(crate) fn default_value(&self) -> Value {
        self.inner
            .members
            .first()
            .map(Type::default_value)
            .unwrap_or_default()
    }

    fn no_match(&self) -> SerializationError {
        let names: Vec<&str> = self.inner.members.iter().map(Type::name).collect();
        SerializationError::expected(&names.join(" | "))
    }

    pub(crate) fn verify(&self, value: &Value) -> SerializationResult<()> {
        self.inner
            .matcher
            .for_value(value)
            .ok_or_else(|| self.no_match())?
            .verify(value)
    }

    pub(crate) fn serialize_with<S: Serializer>(
        &self,
        value: &Value,
        s: &mut S,
    ) -> SerializationResult<S::Handle> {
        self.inner
            .matcher
            .for_value(value)
            .ok_or_else(|| self.no_match())?
            .serialize_with(value, s)
    }

    pub(crate) fn deserialize_with<D: Deserializer>(
        &self,
        handle: &D::Handle,
        d: &D,
    ) -> SerializationResult<Value> {
        self.inner
            .matcher
            .for_handle(handle, d)
            .ok_or_else(|| self.no_match())?
            .deserialize_with(handle, d)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shape(kind: &str, extra: (&str, Type)) -> Type {
        Type::named(
            kind,
            [("kind", Type::string_union([kind])), extra],
        )
    }

    #[test]
    fn test_primitive_members_dispatch_by_shape() {
        let ty = UnionType::new([
            Type::nullable(Type::string()),
            Type::number(),
            Type::array(Type::boolean()),
        ])
        .unwrap();

        for wire in [json!(null), json!("s"), json!(4), json!([true, false])] {
            let value = ty.deserialize(&wire).unwrap();
            assert_eq!(ty.serialize(&value).unwrap(), wire);
        }
        let err = ty.deserialize(&json!(true)).unwrap_err();
        assert!(err.message().starts_with("Expected"));
    }

    #[test]
    fn test_enum_constants_take_priority() {
        let ty = UnionType::new([Type::string_union(["auto"]), Type::number()]).unwrap();
        assert_eq!(ty.deserialize(&json!("auto")).unwrap(), Value::from("auto"));
        assert!(ty.deserialize(&json!("manual")).is_err());
    }

    #[test]
    fn test_objects_are_discriminated() {
        let ty = UnionType::new([
            shape("circle", ("radius", Type::number())),
            shape("rect", ("width", Type::number())),
        ])
        .unwrap();
        let value = ty.deserialize(&json!({"kind": "rect", "width": 2})).unwrap();
        assert_eq!(value.object_type_id(), Some("rect"));
        assert_eq!(
            ty.serialize(&value).unwrap(),
            json!({"kind": "rect", "width": 2})
        );
    }

    #[test]
    fn test_two_nullable_members_fail() {
        let err = UnionType::new([Type::nullable(Type::string()), Type::nullable(Type::number())])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to discriminate between \"string?\" and \"number?\""
        );
    }

    #[test]
    fn test_duplicate_primitive_fails() {
        assert!(UnionType::new([Type::string(), Type::atom()]).is_err());
        assert!(UnionType::new([Type::array(Type::string()), Type::set(Type::number())]).is_err());
    }

    #[test]
    fn test_objects_without_discriminator_fail() {
        let a = Type::named("A", [("x", Type::number())]);
        let b = Type::named("B", [("y", Type::number())]);
        let err = UnionType::new([a, b]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to find a discriminator property for object types"
        );
    }

    #[test]
    fn test_object_lacking_discriminator_fails() {
        let a = shape("a", ("x", Type::number()));
        let b = Type::named("B", [("y", Type::number())]);
        let err = UnionType::new([a, b]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type \"B\" lacks the discriminator property \"kind\""
        );
    }

    #[test]
    fn test_duplicate_discriminator_fails() {
        let a = Type::named("A", [("kind", Type::string_union(["x"]))]);
        let b = Type::named("B", [("kind", Type::string_union(["x"]))]);
        let err = UnionType::new([a, b]).unwrap_err();
        assert_eq!(err.to_string(), "Unable to discriminate between \"A\" and \"B\"");
    }
}
