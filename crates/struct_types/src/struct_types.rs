//! Struct Types - Runtime schema and serialization engine
//!
//! This crate contains the typed schema layer used by the StructSync protocol:
//!
//! - [`Value`] - the decoded, runtime representation of every schema value
//! - [`Type`] - immutable schema definitions with default/verify/serialize/deserialize
//! - [`Serializer`] / [`Deserializer`] - pluggable wire-format visitors
//! - [`Struct`] - named object types bound to typed instances
//! - [`PolymorphicSerializer`] / [`PolymorphicGraphSerializer`] - tag based dispatch
//! - [`Mutation`] - structural edit capture and replay

mod error;
mod mutation;
mod object;
mod polymorphic;
mod serializer;
mod structs;
mod types;
mod union;
mod value;

pub use error::*;
pub use mutation::*;
pub use object::*;
pub use polymorphic::*;
pub use serializer::*;
pub use structs::*;
pub use types::*;
pub use union::*;
pub use value::*;
