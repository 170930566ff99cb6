// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Object factories that turn stored references into live objects.
// Author: Lukas Bower

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use log::trace;

use crate::binding::Reference;
use crate::config::Environment;
use crate::context::Resolved;
use crate::error::NamingError;
use crate::name::Name;

/// Rebuilds an object from a [`Reference`].
pub trait ObjectFactory: Send + Sync {
    /// Produce the object described by `reference`, bound under `name`.
    fn get_object_instance(
        &self,
        reference: &Reference,
        name: &Name,
        env: &Environment,
    ) -> Result<Resolved, NamingError>;
}

impl<F> ObjectFactory for F
where
    F: Fn(&Reference, &Name, &Environment) -> Result<Resolved, NamingError> + Send + Sync,
{
    fn get_object_instance(
        &self,
        reference: &Reference,
        name: &Name,
        env: &Environment,
    ) -> Result<Resolved, NamingError> {
        self(reference, name, env)
    }
}

/// Factories keyed by the name a reference records.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ObjectFactory>>>,
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factories = self.factories.read().expect("poisoned factory lock");
        let mut names: Vec<&String> = factories.keys().collect();
        names.sort();
        f.debug_struct("FactoryRegistry")
            .field("factories", &names)
            .finish()
    }
}

impl FactoryRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, returning any factory it replaces.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn ObjectFactory>,
    ) -> Option<Arc<dyn ObjectFactory>> {
        self.factories
            .write()
            .expect("poisoned factory lock")
            .insert(name.into(), factory)
    }

    /// Remove the factory registered under `name`.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn ObjectFactory>> {
        self.factories
            .write()
            .expect("poisoned factory lock")
            .remove(name)
    }

    /// Rebuild `reference`.
    ///
    /// A reference without a factory comes back unchanged. A factory name
    /// with no registration fails [`NamingError::MissingFactory`].
    pub fn get_object_instance(
        &self,
        reference: &Reference,
        name: &Name,
        env: &Environment,
    ) -> Result<Resolved, NamingError> {
        let Some(factory_name) = reference.factory.as_deref() else {
            return Ok(Resolved::Reference(reference.clone()));
        };
        let factory = self
            .factories
            .read()
            .expect("poisoned factory lock")
            .get(factory_name)
            .cloned();
        match factory {
            Some(factory) => {
                trace!("rebuilding {name} with factory {factory_name}");
                factory.get_object_instance(reference, name, env)
            }
            None => Err(NamingError::MissingFactory {
                factory: factory_name.to_owned(),
                target: name.to_string(),
            }),
        }
    }
}
