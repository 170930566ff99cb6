// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Crate root for the naming-door hierarchical naming service.
// Author: Lukas Bower

//! Hierarchical naming service with remote bootstrap and discovery.
//!
//! Servers hold a [`NamingTree`] and expose it through a [`NamingService`]:
//! a framed TCP endpoint for naming calls, a bootstrap listener vending
//! handles to that endpoint, and an optional UDP discovery responder.
//! Clients resolve names through a [`NamingContext`], which finds a server
//! (provider URLs, partition, discovery, or the in-process tree), follows
//! links and federation points, and rebuilds references with registered
//! object factories.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Stored objects, references, and links.
pub mod binding;
/// Bootstrap listener.
pub mod bootstrap;
/// Client environment and daemon configuration.
pub mod config;
/// Client naming context.
pub mod context;
/// UDP discovery client and responder.
pub mod discovery;
/// Error types.
pub mod error;
/// Naming events and listeners.
pub mod event;
/// Object factories.
pub mod factory;
/// Server-side naming RPC endpoint.
pub mod invoker;
/// Composite names and URL schemes.
pub mod name;
/// The naming handle interface.
pub mod naming;
/// Path permissions.
pub mod permission;
/// Process registry of handles.
pub mod registry;
/// TCP proxy implementing [`naming::Naming`].
pub mod remote;
/// Service lifecycle.
pub mod service;
/// The naming tree.
pub mod tree;
/// Wire frames.
pub mod wire;

pub use binding::{Binding, LinkRef, NameClassPair, NamingObject, Reference};
pub use config::{Environment, ServerConfig};
pub use context::{NamingContext, Resolved, ResolvedBinding};
pub use error::NamingError;
pub use event::{EventScope, NamingEvent, NamingListener};
pub use name::{HostPort, Name};
pub use naming::Naming;
pub use registry::NamingRegistry;
pub use service::{local_context, NamingService};
pub use tree::NamingTree;
