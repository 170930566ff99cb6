// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Handle interface shared by the in-process tree, remote proxies, and wrappers.
// Author: Lukas Bower

use std::fmt;
use std::sync::Arc;

use crate::binding::{Binding, ContextRef, LookupResult, NameClassPair, NamingObject};
use crate::error::NamingError;
use crate::name::Name;
use crate::tree::NamingTree;

/// Operations a naming tree handle exposes.
///
/// Names are absolute from the root of the tree behind the handle.
/// Implementations are the in-process [`NamingTree`], the TCP proxy
/// [`RemoteNaming`](crate::remote::RemoteNaming), and the delegating
/// [`NamingServerWrapper`].
pub trait Naming: Send + Sync {
    /// Bind `object` under a new name.
    fn bind(&self, name: &Name, object: NamingObject, class_name: &str) -> Result<(), NamingError>;

    /// Bind `object`, replacing any existing binding.
    fn rebind(&self, name: &Name, object: NamingObject, class_name: &str)
        -> Result<(), NamingError>;

    /// Remove a binding.
    fn unbind(&self, name: &Name) -> Result<(), NamingError>;

    /// Resolve a name without following links.
    fn lookup(&self, name: &Name) -> Result<LookupResult, NamingError>;

    /// Names and type tags bound in a context.
    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, NamingError>;

    /// Bindings of a context; subcontexts appear as context handles.
    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding>, NamingError>;

    /// Create an empty subcontext.
    fn create_subcontext(&self, name: &Name) -> Result<ContextRef, NamingError>;

    /// Identifier of the tree instance behind this handle.
    fn instance_id(&self) -> u64;

    /// The in-process tree, when the handle reaches one without a network hop.
    fn as_tree(&self) -> Option<&NamingTree> {
        None
    }
}

/// Delegate used when a service adopts a tree that is already installed.
pub struct NamingServerWrapper {
    delegate: Arc<dyn Naming>,
}

impl NamingServerWrapper {
    /// Wrap `delegate`.
    #[must_use]
    pub fn new(delegate: Arc<dyn Naming>) -> Self {
        Self { delegate }
    }

    /// The wrapped handle.
    #[must_use]
    pub fn delegate(&self) -> &Arc<dyn Naming> {
        &self.delegate
    }
}

impl fmt::Debug for NamingServerWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingServerWrapper")
            .field("instance", &self.delegate.instance_id())
            .finish()
    }
}

impl Naming for NamingServerWrapper {
    fn bind(&self, name: &Name, object: NamingObject, class_name: &str) -> Result<(), NamingError> {
        self.delegate.bind(name, object, class_name)
    }

    fn rebind(
        &self,
        name: &Name,
        object: NamingObject,
        class_name: &str,
    ) -> Result<(), NamingError> {
        self.delegate.rebind(name, object, class_name)
    }

    fn unbind(&self, name: &Name) -> Result<(), NamingError> {
        self.delegate.unbind(name)
    }

    fn lookup(&self, name: &Name) -> Result<LookupResult, NamingError> {
        self.delegate.lookup(name)
    }

    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, NamingError> {
        self.delegate.list(name)
    }

    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding>, NamingError> {
        self.delegate.list_bindings(name)
    }

    fn create_subcontext(&self, name: &Name) -> Result<ContextRef, NamingError> {
        self.delegate.create_subcontext(name)
    }

    fn instance_id(&self) -> u64 {
        self.delegate.instance_id()
    }

    fn as_tree(&self) -> Option<&NamingTree> {
        self.delegate.as_tree()
    }
}
