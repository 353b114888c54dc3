//! StructSync
//!
//! Live state synchronization built on `struct_types`. A [`Contract`] binds a
//! [`Struct`](struct_types::Struct) to named actions and events. The
//! [`Controller`] owns the authoritative instance on the server side, every
//! [`Proxy`] mirrors it on a client, and edits recorded by
//! [`Controller::mutate`] are replayed on each tracking proxy.
//!
//! # Topology
//!
//! - [`StructSyncServer`]: controller registry, attached sessions, middleware
//! - [`StructSyncSession`]: one connection on the server side
//! - [`StructSyncClient`]: tracked proxies and outbound requests
//! - [`MessageBridge`]: request/response transport between the two sides

mod action;
mod bridge;
mod client;
mod config;
mod contract;
mod controller;
mod error;
mod messages;
mod middleware;
mod proxy;
mod server;
mod session;

pub use action::*;
pub use bridge::*;
pub use client::*;
pub use config::*;
pub use contract::*;
pub use controller::*;
pub use error::*;
pub use messages::*;
pub use middleware::*;
pub use proxy::*;
pub use server::*;
pub use session::*;
