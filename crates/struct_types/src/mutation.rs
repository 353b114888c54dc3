//! Structural edit capture and replay
//!
//! Code mutates a typed value through a [`MutationCursor`]. Every write is
//! recorded as a [`Mutation`] whose path is resolved against the schema, so
//! the same edit can be replayed with [`Mutation::apply`] on any value of the
//! same type. In live mode the edit is applied to the target by the same call
//! that records it, through the same replay routine.
//!
//! ```ignore
//! let edits = Mutation::create(Some(&mut playlist), Some(&playlist_t), |v| {
//!     v.field("tracks")?.splice(1, 1, vec![])
//! })?;
//! ```

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::error::{SerializationError, format_path};
use crate::types::{Type, TypeKind};
use crate::value::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while recording or replaying mutations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MutationError {
    #[error(
        "Cannot mutate property \"{key}\" on type \"{type_name}\", property does not exist at \"{path}\""
    )]
    UnknownProperty {
        key: String,
        type_name: String,
        path: String,
    },

    #[error("Invalid mutation target \"{segment}\" at \"{path}\"")]
    InvalidTarget { segment: String, path: String },

    #[error("Mutation target is null at \"{path}\"")]
    NullTarget { path: String },

    #[error("Cannot navigate into non-container type \"{type_name}\" at \"{path}\"")]
    NotCompound { type_name: String, path: String },

    #[error("Only path and type are accessible on a dry view of \"{type_name}\"")]
    DryLeaf { type_name: String },

    #[error("Operation \"{0}\" requires a live mutation target")]
    RequiresTarget(&'static str),

    #[error("Invalid mutation message: {0}")]
    InvalidMessage(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

pub type MutationResult<T> = Result<T, MutationError>;

// ─────────────────────────────────────────────────────────────────────────────
// Mutation Records
// ─────────────────────────────────────────────────────────────────────────────

/// Payload of an edit, either decoded or still in wire form
#[derive(Debug, Clone, PartialEq)]
pub enum MutationValue {
    Value(Value),
    Wire(serde_json::Value),
}

impl MutationValue {
    /// Decode with the given type, or generically without one
    pub fn decode(&self, ty: Option<&Type>) -> Result<Value, SerializationError> {
        match (self, ty) {
            (MutationValue::Value(v), _) => Ok(v.clone()),
            (MutationValue::Wire(w), Some(ty)) => ty.deserialize(w),
            (MutationValue::Wire(w), None) => Ok(Value::from(w.clone())),
        }
    }

    /// Encode with the given type, or generically without one
    pub fn encode(&self, ty: Option<&Type>) -> Result<serde_json::Value, SerializationError> {
        match (self, ty) {
            (MutationValue::Wire(w), _) => Ok(w.clone()),
            (MutationValue::Value(v), Some(ty)) => ty.serialize(v),
            (MutationValue::Value(v), None) => Ok(v.to_json()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    /// Set `key` on the container at `path`
    Assign { key: String, value: MutationValue },
    /// Remove `key` from the object or map at `path`
    Delete { key: String },
    /// Array splice; `delete_count == -1` clears arrays, maps and sets
    Splice {
        index: usize,
        delete_count: i64,
        items: Vec<MutationValue>,
    },
}

/// One structural edit addressed by a schema path
///
/// For assignments `ty` is the type of the assigned slot, for splices it is
/// the type of the container being spliced.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub path: Vec<String>,
    pub kind: MutationKind,
    pub ty: Option<Type>,
}

/// Wire form of a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationMessage {
    MutAssign {
        path: Vec<String>,
        key: String,
        value: serde_json::Value,
    },
    MutSplice {
        path: Vec<String>,
        index: usize,
        #[serde(rename = "deleteCount")]
        delete_count: i64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        items: Vec<serde_json::Value>,
    },
    MutDelete { path: Vec<String>, key: String },
}

impl Mutation {
    pub fn assign(path: Vec<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            path,
            kind: MutationKind::Assign {
                key: key.into(),
                value: MutationValue::Value(value),
            },
            ty: None,
        }
    }

    pub fn delete(path: Vec<String>, key: impl Into<String>) -> Self {
        Self {
            path,
            kind: MutationKind::Delete { key: key.into() },
            ty: None,
        }
    }

    pub fn splice(path: Vec<String>, index: usize, delete_count: i64, items: Vec<Value>) -> Self {
        Self {
            path,
            kind: MutationKind::Splice {
                index,
                delete_count,
                items: items.into_iter().map(MutationValue::Value).collect(),
            },
            ty: None,
        }
    }

    /// Encode into the wire message
    pub fn to_message(&self) -> MutationResult<MutationMessage> {
        let path = self.path.clone();
        Ok(match &self.kind {
            MutationKind::Assign { key, value } => MutationMessage::MutAssign {
                path,
                key: key.clone(),
                value: value.encode(self.ty.as_ref())?,
            },
            MutationKind::Delete { key } => MutationMessage::MutDelete {
                path,
                key: key.clone(),
            },
            MutationKind::Splice {
                index,
                delete_count,
                items,
            } => {
                let element = self.ty.as_ref().and_then(element_type);
                MutationMessage::MutSplice {
                    path,
                    index: *index,
                    delete_count: *delete_count,
                    items: items
                        .iter()
                        .map(|item| item.encode(element.as_ref()))
                        .collect::<Result<_, _>>()?,
                }
            }
        })
    }

    /// Decode a wire message, payloads stay in wire form until applied
    pub fn from_message(message: MutationMessage) -> Self {
        let (path, kind) = match message {
            MutationMessage::MutAssign { path, key, value } => (
                path,
                MutationKind::Assign {
                    key,
                    value: MutationValue::Wire(value),
                },
            ),
            MutationMessage::MutDelete { path, key } => (path, MutationKind::Delete { key }),
            MutationMessage::MutSplice {
                path,
                index,
                delete_count,
                items,
            } => (
                path,
                MutationKind::Splice {
                    index,
                    delete_count,
                    items: items.into_iter().map(MutationValue::Wire).collect(),
                },
            ),
        };
        Self {
            path,
            kind,
            ty: None,
        }
    }

    pub fn to_wire(&self) -> MutationResult<serde_json::Value> {
        serde_json::to_value(self.to_message()?)
            .map_err(|e| MutationError::InvalidMessage(e.to_string()))
    }

    pub fn from_wire(wire: serde_json::Value) -> MutationResult<Self> {
        serde_json::from_value(wire)
            .map(Self::from_message)
            .map_err(|e| MutationError::InvalidMessage(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema Navigation
// ─────────────────────────────────────────────────────────────────────────────

fn element_type(container: &Type) -> Option<Type> {
    match container.strip_nullable().kind() {
        TypeKind::Array(e) | TypeKind::Set(e) | TypeKind::Map(e) | TypeKind::Record(e) => {
            Some(e.clone())
        }
        _ => None,
    }
}

fn is_leaf(ty: &Type) -> bool {
    matches!(
        ty.strip_nullable().kind(),
        TypeKind::Number
            | TypeKind::String
            | TypeKind::Boolean
            | TypeKind::Atom
            | TypeKind::Empty
            | TypeKind::Enum(_)
            | TypeKind::GraphRef(_)
    )
}

fn object_prop(
    container: &Type,
    object: &crate::object::ObjectType,
    segment: &str,
    path: &str,
) -> MutationResult<Option<Type>> {
    object
        .prop(segment)
        .cloned()
        .map(Some)
        .ok_or_else(|| MutationError::UnknownProperty {
            key: segment.to_string(),
            type_name: container.name().to_string(),
            path: path.to_string(),
        })
}

/// Type of `segment` inside a container of type `container`
///
/// `value` is the runtime container when known; it is needed to resolve
/// polymorphic members. `None` means the child is untyped.
fn child_type(
    container: &Type,
    value: Option<&Value>,
    segment: &str,
    path: &str,
) -> MutationResult<Option<Type>> {
    let ty = container.strip_nullable();
    match ty.kind() {
        TypeKind::Object(object) => object_prop(&ty, object, segment, path),
        TypeKind::Array(e) | TypeKind::Set(e) | TypeKind::Map(e) | TypeKind::Record(e) => {
            Ok(Some(e.clone()))
        }
        TypeKind::Any => Ok(None),
        TypeKind::Polymorphic(poly) => {
            match value.and_then(Value::object_type_id).and_then(|tag| poly.get(tag)) {
                Some(st) => object_prop(st.base_type(), st.object_type(), segment, path),
                None => Ok(None),
            }
        }
        TypeKind::ByKeyUnion { key, variants } => {
            let variant = value
                .and_then(|v| v.get(key))
                .and_then(Value::as_str)
                .and_then(|tag| variants.iter().find(|(t, _)| t == tag))
                .and_then(|(_, vt)| vt.as_object().map(|o| (vt.clone(), o)));
            match variant {
                Some((vt, object)) if segment != key => object_prop(&vt, &object, segment, path),
                _ => Ok(None),
            }
        }
        _ => Err(MutationError::NotCompound {
            type_name: ty.name().to_string(),
            path: path.to_string(),
        }),
    }
}

fn child_value<'v>(container: &'v Value, segment: &str) -> Option<&'v Value> {
    match container {
        Value::Object { .. } | Value::Map(_) => container.get(segment),
        Value::Array(_) | Value::Set(_) => segment
            .parse::<usize>()
            .ok()
            .and_then(|i| container.get_index(i)),
        _ => None,
    }
}

fn value_at<'v>(root: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter()
        .try_fold(root, |current, segment| child_value(current, segment))
}

/// Walk `path` from `target`, keeping the schema type in lock-step
fn navigate<'v>(
    target: &'v mut Value,
    ty: Option<&Type>,
    path: &[String],
) -> MutationResult<(&'v mut Value, Option<Type>)> {
    let mut current = target;
    let mut current_ty = ty.cloned();

    for (depth, segment) in path.iter().enumerate() {
        let here = format_path(&path[..depth]);
        if current.is_null() {
            return Err(MutationError::NullTarget { path: here });
        }

        let next_ty = match &current_ty {
            Some(t) => child_type(t, Some(&*current), segment, &here)?,
            None => None,
        };

        let next = match current {
            Value::Object { fields, .. } => fields.get_mut(segment),
            Value::Map(entries) => entries
                .iter_mut()
                .find(|(k, _)| k == segment)
                .map(|(_, v)| v),
            Value::Array(items) | Value::Set(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i)),
            _ => None,
        };

        current = next.ok_or_else(|| MutationError::InvalidTarget {
            segment: segment.clone(),
            path: here,
        })?;
        current_ty = next_ty;
    }

    Ok((current, current_ty))
}

// ─────────────────────────────────────────────────────────────────────────────
// Replay
// ─────────────────────────────────────────────────────────────────────────────

impl Mutation {
    /// Replay an edit against `target`
    ///
    /// Without a type the path is followed by runtime shape only and payloads
    /// are decoded generically.
    pub fn apply(target: &mut Value, ty: Option<&Type>, mutation: &Mutation) -> MutationResult<()> {
        let (container, container_ty) = navigate(target, ty, &mutation.path)?;
        let here = format_path(&mutation.path);
        if container.is_null() {
            return Err(MutationError::NullTarget { path: here });
        }

        match &mutation.kind {
            MutationKind::Assign { key, value } => {
                let slot_ty = match &container_ty {
                    Some(t) => child_type(t, Some(&*container), key, &here)?,
                    None => None,
                };
                let decoded = value.decode(mutation.ty.as_ref().or(slot_ty.as_ref()))?;
                assign_slot(container, key, decoded, &here)
            }
            MutationKind::Delete { key } => {
                if let Some(t) = &container_ty {
                    child_type(t, Some(&*container), key, &here)?;
                }
                match container {
                    Value::Object { fields, .. } => {
                        fields.remove(key);
                        Ok(())
                    }
                    Value::Map(entries) => {
                        Value::map_remove(entries, key);
                        Ok(())
                    }
                    _ => Err(MutationError::InvalidTarget {
                        segment: key.clone(),
                        path: here,
                    }),
                }
            }
            MutationKind::Splice {
                index,
                delete_count,
                items,
            } => {
                let element = container_ty.as_ref().and_then(element_type);
                let decoded = items
                    .iter()
                    .map(|item| item.decode(element.as_ref()))
                    .collect::<Result<Vec<_>, _>>()?;
                splice_container(container, *index, *delete_count, decoded, &here)
            }
        }
    }
}

fn assign_slot(container: &mut Value, key: &str, value: Value, here: &str) -> MutationResult<()> {
    let invalid = || MutationError::InvalidTarget {
        segment: key.to_string(),
        path: here.to_string(),
    };
    match container {
        Value::Object { fields, .. } => {
            fields.insert(key.to_string(), value);
            Ok(())
        }
        Value::Map(entries) => {
            Value::map_insert(entries, key, value);
            Ok(())
        }
        Value::Array(items) => {
            let index = key.parse::<usize>().map_err(|_| invalid())?;
            if index < items.len() {
                items[index] = value;
            } else if index == items.len() {
                items.push(value);
            } else {
                return Err(invalid());
            }
            Ok(())
        }
        _ => Err(invalid()),
    }
}

fn splice_container(
    container: &mut Value,
    index: usize,
    delete_count: i64,
    items: Vec<Value>,
    here: &str,
) -> MutationResult<()> {
    if delete_count < -1 {
        return Err(MutationError::InvalidMessage(format!(
            "delete count {delete_count} at \"{here}\""
        )));
    }

    match container {
        Value::Array(values) => {
            if delete_count == -1 {
                values.clear();
                return Ok(());
            }
            let start = index.min(values.len());
            let end = (start + delete_count as usize).min(values.len());
            values.splice(start..end, items);
            Ok(())
        }
        Value::Map(entries) if delete_count == -1 => {
            entries.clear();
            Ok(())
        }
        Value::Object { type_id: None, fields } if delete_count == -1 => {
            fields.clear();
            Ok(())
        }
        Value::Set(values) => match (index, delete_count, items.len()) {
            (_, -1, 0) => {
                values.clear();
                Ok(())
            }
            (0, 0, 1) => {
                if let Some(item) = items.into_iter().next() {
                    Value::set_insert(values, item);
                }
                Ok(())
            }
            (ordinal, 1, 0) if ordinal < values.len() => {
                values.remove(ordinal);
                Ok(())
            }
            (ordinal, 1, 0) => Err(MutationError::InvalidTarget {
                segment: ordinal.to_string(),
                path: here.to_string(),
            }),
            _ => Err(MutationError::InvalidMessage(format!(
                "unsupported set splice ({index}, {delete_count}) at \"{here}\""
            ))),
        },
        other => Err(MutationError::InvalidMessage(format!(
            "cannot splice {} at \"{here}\"",
            other.kind_name()
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording Cursor
// ─────────────────────────────────────────────────────────────────────────────

struct Recorder {
    target: Option<Value>,
    root_ty: Option<Type>,
    edits: Vec<Mutation>,
}

/// Typed view of one location inside a value being mutated
///
/// Navigation returns a child cursor scoped to the child type and the
/// extended path. Writes are recorded in call order and, in live mode,
/// applied immediately.
pub struct MutationCursor<'r> {
    recorder: &'r RefCell<Recorder>,
    path: Vec<String>,
    ty: Option<Type>,
}

impl Mutation {
    /// Run `thunk` against a cursor and collect the edits it performs
    ///
    /// With a target the cursor is live and edits are applied as they are
    /// recorded. The target is written back only when the thunk succeeds. Without a target the cursor is dry and only records.
    pub fn create<F>(target: Option<&mut Value>, ty: Option<&Type>, thunk: F) -> MutationResult<Vec<Mutation>>
    where
        F: FnOnce(&MutationCursor<'_>) -> MutationResult<()>,
    {
        let recorder = RefCell::new(Recorder {
            target: target.as_deref().cloned(),
            root_ty: ty.cloned(),
            edits: Vec::new(),
        });

        let result = thunk(&MutationCursor::root(&recorder));
        let Recorder {
            target: mutated,
            edits,
            ..
        } = recorder.into_inner();

        result?;
        if let (Some(target), Some(mutated)) = (target, mutated) {
            *target = mutated;
        }
        Ok(edits)
    }

    /// Capture the path addressed by a navigation thunk without any data
    pub fn get_path<F>(ty: &Type, thunk: F) -> MutationResult<Vec<String>>
    where
        F: for<'r> FnOnce(&MutationCursor<'r>) -> MutationResult<MutationCursor<'r>>,
    {
        let recorder = RefCell::new(Recorder {
            target: None,
            root_ty: Some(ty.clone()),
            edits: Vec::new(),
        });
        let root = MutationCursor::root(&recorder);
        let cursor = thunk(&root)?;
        Ok(cursor.path)
    }
}

impl<'r> MutationCursor<'r> {
    fn root(recorder: &'r RefCell<Recorder>) -> Self {
        let ty = recorder.borrow().root_ty.clone();
        Self {
            recorder,
            path: Vec::new(),
            ty,
        }
    }

    /// Path of this location from the root
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Schema type of this location, `None` when untyped
    pub fn value_type(&self) -> Option<&Type> {
        self.ty.as_ref()
    }

    fn is_live(&self) -> bool {
        self.recorder.borrow().target.is_some()
    }

    fn here(&self) -> String {
        format_path(&self.path)
    }

    /// Dry views of leaf types only expose path and type
    fn guard(&self) -> MutationResult<()> {
        match &self.ty {
            Some(ty) if !self.is_live() && is_leaf(ty) => Err(MutationError::DryLeaf {
                type_name: ty.name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn with_value<T>(&self, f: impl FnOnce(Option<&Value>) -> T) -> T {
        let rec = self.recorder.borrow();
        f(rec.target.as_ref().and_then(|root| value_at(root, &self.path)))
    }

    fn slot_type(&self, segment: &str) -> MutationResult<Option<Type>> {
        match &self.ty {
            Some(ty) => {
                let here = self.here();
                self.with_value(|v| child_type(ty, v, segment, &here))
            }
            None => Ok(None),
        }
    }

    fn container_kind(&self) -> Option<TypeKind> {
        self.ty.as_ref().map(|t| t.strip_nullable().kind().clone())
    }

    fn record(&self, mutation: Mutation) -> MutationResult<()> {
        let mut guard = self.recorder.borrow_mut();
        let rec = &mut *guard;
        if let Some(target) = rec.target.as_mut() {
            Mutation::apply(target, rec.root_ty.as_ref(), &mutation)?;
        }
        rec.edits.push(mutation);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Navigation
    // ─────────────────────────────────────────────────────────────────────

    /// Cursor for an object property or map entry
    pub fn field(&self, key: &str) -> MutationResult<MutationCursor<'r>> {
        self.guard()?;
        let ty = self.slot_type(key)?;

        if self.is_live() {
            let here = self.here();
            self.with_value(|container| match container {
                Some(Value::Null) => Err(MutationError::NullTarget { path: here.clone() }),
                Some(c) if child_value(c, key).is_some() => Ok(()),
                _ => Err(MutationError::InvalidTarget {
                    segment: key.to_string(),
                    path: here.clone(),
                }),
            })?;
        }

        let mut path = self.path.clone();
        path.push(key.to_string());
        Ok(MutationCursor {
            recorder: self.recorder,
            path,
            ty,
        })
    }

    /// Cursor for an array element or a set member by ordinal
    pub fn index(&self, index: usize) -> MutationResult<MutationCursor<'r>> {
        self.field(&index.to_string())
    }

    /// Current value, `None` in dry mode
    pub fn get(&self) -> MutationResult<Option<Value>> {
        self.guard()?;
        Ok(self.with_value(|v| v.cloned()))
    }

    /// Number of entries of the container at this location
    pub fn len(&self) -> MutationResult<usize> {
        self.guard()?;
        if !self.is_live() {
            return Err(MutationError::RequiresTarget("len"));
        }
        self.with_value(|v| v.and_then(Value::len))
            .ok_or_else(|| MutationError::NotCompound {
                type_name: self
                    .ty
                    .as_ref()
                    .map(|t| t.name().to_string())
                    .unwrap_or_default(),
                path: self.here(),
            })
    }

    pub fn is_empty(&self) -> MutationResult<bool> {
        Ok(self.len()? == 0)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Edits
    // ─────────────────────────────────────────────────────────────────────

    /// Assign an object property, map entry or array slot
    pub fn assign(&self, key: &str, value: impl Into<Value>) -> MutationResult<()> {
        self.guard()?;
        let value = value.into();
        let slot_ty = self.slot_type(key)?;
        if let Some(ty) = &slot_ty {
            ty.verify(&value).map_err(|e| e.append_path(key))?;
        }
        self.record(Mutation {
            path: self.path.clone(),
            kind: MutationKind::Assign {
                key: key.to_string(),
                value: MutationValue::Value(value),
            },
            ty: slot_ty,
        })
    }

    /// Remove an object property or map entry
    ///
    /// Deleting a missing map key in live mode records nothing.
    pub fn delete(&self, key: &str) -> MutationResult<()> {
        self.guard()?;
        self.slot_type(key)?;
        let absent_map_key = self.with_value(|v| match v {
            Some(map @ Value::Map(_)) => map.get(key).is_none(),
            _ => false,
        });
        if absent_map_key {
            return Ok(());
        }
        self.record(Mutation {
            path: self.path.clone(),
            kind: MutationKind::Delete {
                key: key.to_string(),
            },
            ty: None,
        })
    }

    /// Array splice
    pub fn splice(&self, index: usize, delete_count: usize, items: Vec<Value>) -> MutationResult<()> {
        self.guard()?;
        if let Some(kind) = self.container_kind() {
            let TypeKind::Array(element) = kind else {
                return Err(self.not_compound("splice"));
            };
            for (offset, item) in items.iter().enumerate() {
                element
                    .verify(item)
                    .map_err(|e| e.append_path(index + offset))?;
            }
        }
        self.record(Mutation {
            path: self.path.clone(),
            kind: MutationKind::Splice {
                index,
                delete_count: delete_count as i64,
                items: items.into_iter().map(MutationValue::Value).collect(),
            },
            ty: self.ty.clone(),
        })
    }

    /// Append to an array
    pub fn push(&self, item: impl Into<Value>) -> MutationResult<()> {
        self.guard()?;
        if !self.is_live() {
            return Err(MutationError::RequiresTarget("push"));
        }
        let len = self.len()?;
        self.splice(len, 0, vec![item.into()])
    }

    /// Empty an array, map, record or set
    pub fn clear(&self) -> MutationResult<()> {
        self.guard()?;
        match self.container_kind() {
            None
            | Some(TypeKind::Array(_) | TypeKind::Set(_) | TypeKind::Map(_) | TypeKind::Record(_)) => {}
            Some(_) => return Err(self.not_compound("clear")),
        }
        self.record(Mutation {
            path: self.path.clone(),
            kind: MutationKind::Splice {
                index: 0,
                delete_count: -1,
                items: Vec::new(),
            },
            ty: self.ty.clone(),
        })
    }

    /// Insert into a set
    pub fn add(&self, item: impl Into<Value>) -> MutationResult<()> {
        self.guard()?;
        let item = item.into();
        match self.container_kind() {
            Some(TypeKind::Set(element)) => element.verify(&item)?,
            None => {}
            Some(_) => return Err(self.not_compound("add")),
        }
        self.record(Mutation {
            path: self.path.clone(),
            kind: MutationKind::Splice {
                index: 0,
                delete_count: 0,
                items: vec![MutationValue::Value(item)],
            },
            ty: self.ty.clone(),
        })
    }

    /// Remove a set member by value, returns whether it was present
    pub fn remove(&self, item: &Value) -> MutationResult<bool> {
        self.guard()?;
        if !self.is_live() {
            return Err(MutationError::RequiresTarget("remove"));
        }
        let ordinal = self.with_value(|v| {
            v.and_then(Value::as_set)
                .and_then(|items| items.iter().position(|i| i == item))
        });
        match ordinal {
            Some(ordinal) => self.remove_at(ordinal).map(|_| true),
            None => Ok(false),
        }
    }

    /// Remove the set member at an ordinal position
    pub fn remove_at(&self, ordinal: usize) -> MutationResult<()> {
        self.guard()?;
        match self.container_kind() {
            Some(TypeKind::Set(_)) | None => {}
            Some(_) => return Err(self.not_compound("remove")),
        }
        self.record(Mutation {
            path: self.path.clone(),
            kind: MutationKind::Splice {
                index: ordinal,
                delete_count: 1,
                items: Vec::new(),
            },
            ty: self.ty.clone(),
        })
    }

    fn not_compound(&self, operation: &str) -> MutationError {
        MutationError::InvalidMessage(format!(
            "cannot {operation} type \"{}\" at \"{}\"",
            self.ty.as_ref().map(Type::name).unwrap_or("unknown"),
            self.here()
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
