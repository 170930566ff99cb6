// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Process registry of naming handles, partitions, and object factories.
// Author: Lukas Bower

//! Shared client-side state.
//!
//! One [`NamingRegistry`] is created per process (or per test) and handed to
//! every [`NamingContext`](crate::context::NamingContext) built on it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use log::{debug, trace};

use crate::config::Environment;
use crate::error::NamingError;
use crate::factory::FactoryRegistry;
use crate::name::HostPort;
use crate::naming::Naming;
use crate::remote::{connect, RemoteNaming};
use crate::wire::{read_frame, NamingStub};

/// Obtains a naming handle for a bootstrap endpoint.
pub trait StubLoader: Send + Sync {
    /// Fetch a handle to the tree served at `endpoint`.
    fn load(&self, endpoint: &HostPort, env: &Environment) -> Result<Arc<dyn Naming>, NamingError>;
}

/// Loader speaking the bootstrap protocol: connect, read one stub frame, close.
#[derive(Debug, Default, Clone, Copy)]
pub struct BootstrapStubLoader;

impl StubLoader for BootstrapStubLoader {
    fn load(&self, endpoint: &HostPort, env: &Environment) -> Result<Arc<dyn Naming>, NamingError> {
        let mut stream = connect(endpoint, env.connect_timeout()?).map_err(|error| match error {
            NamingError::ConnectRefused { target, source } => {
                NamingError::io(format!("failed to connect to server {target}"), source)
            }
            other => other,
        })?;
        stream
            .set_read_timeout(Some(env.read_timeout()?))
            .map_err(|error| NamingError::io(format!("failed to configure {endpoint}"), error))?;
        let stub: NamingStub = read_frame(&mut stream).map_err(|error| {
            NamingError::io(format!("failed to retrieve naming stub from {endpoint}"), error)
        })?;
        debug!(
            "bootstrap {endpoint} vended instance {:#x} at {}",
            stub.instance,
            stub.endpoint()
        );
        Ok(Arc::new(RemoteNaming::from_env(stub, env)?))
    }
}

/// Stub cache, partition map, local server slot, and object factories.
pub struct NamingRegistry {
    stubs: RwLock<HashMap<String, Weak<dyn Naming>>>,
    partitions: RwLock<HashMap<String, Arc<dyn Naming>>>,
    local_server: RwLock<Option<Arc<dyn Naming>>>,
    factories: FactoryRegistry,
    loader: Arc<dyn StubLoader>,
    discovery_disabled: AtomicBool,
}

impl fmt::Debug for NamingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingRegistry")
            .field(
                "cached_stubs",
                &self.stubs.read().expect("poisoned stub cache lock").len(),
            )
            .field(
                "partitions",
                &self.partitions.read().expect("poisoned partition lock").len(),
            )
            .field("discovery_disabled", &self.discovery_disabled())
            .finish_non_exhaustive()
    }
}

impl Default for NamingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamingRegistry {
    /// Registry that fetches handles with the bootstrap protocol.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stub_loader(Arc::new(BootstrapStubLoader))
    }

    /// Registry with a custom handle loader.
    #[must_use]
    pub fn with_stub_loader(loader: Arc<dyn StubLoader>) -> Self {
        Self {
            stubs: RwLock::new(HashMap::new()),
            partitions: RwLock::new(HashMap::new()),
            local_server: RwLock::new(None),
            factories: FactoryRegistry::new(),
            loader,
            discovery_disabled: AtomicBool::new(false),
        }
    }

    /// Cached handle for `endpoint`, loading a fresh one if none is live.
    pub fn get_server(
        &self,
        endpoint: &HostPort,
        env: &Environment,
    ) -> Result<Arc<dyn Naming>, NamingError> {
        let key = endpoint.to_string();
        let cached = self
            .stubs
            .read()
            .expect("poisoned stub cache lock")
            .get(&key)
            .and_then(Weak::upgrade);
        if let Some(naming) = cached {
            trace!("using cached naming handle for {key}");
            return Ok(naming);
        }
        let naming = self.loader.load(endpoint, env)?;
        self.stubs
            .write()
            .expect("poisoned stub cache lock")
            .insert(key, Arc::downgrade(&naming));
        Ok(naming)
    }

    /// Drop the cached handle for `key` (`host:port`).
    pub fn remove_server(&self, key: &str) {
        if self
            .stubs
            .write()
            .expect("poisoned stub cache lock")
            .remove(key)
            .is_some()
        {
            debug!("evicted naming handle for {key}");
        }
    }

    /// Number of cache entries whose handle is still alive.
    #[must_use]
    pub fn cached_servers(&self) -> usize {
        self.stubs
            .read()
            .expect("poisoned stub cache lock")
            .values()
            .filter(|stub| stub.strong_count() > 0)
            .count()
    }

    /// Make `naming` answer discovery for `partition` without network I/O.
    pub fn register_partition(&self, partition: impl Into<String>, naming: Arc<dyn Naming>) {
        self.partitions
            .write()
            .expect("poisoned partition lock")
            .insert(partition.into(), naming);
    }

    /// Remove a partition registration.
    pub fn unregister_partition(&self, partition: &str) -> Option<Arc<dyn Naming>> {
        self.partitions
            .write()
            .expect("poisoned partition lock")
            .remove(partition)
    }

    /// Handle registered for `partition`.
    #[must_use]
    pub fn partition(&self, partition: &str) -> Option<Arc<dyn Naming>> {
        self.partitions
            .read()
            .expect("poisoned partition lock")
            .get(partition)
            .cloned()
    }

    /// Install or clear the in-process server.
    pub fn set_local_server(&self, naming: Option<Arc<dyn Naming>>) {
        *self.local_server.write().expect("poisoned local server lock") = naming;
    }

    /// The in-process server, if one is installed.
    #[must_use]
    pub fn local_server(&self) -> Option<Arc<dyn Naming>> {
        self.local_server
            .read()
            .expect("poisoned local server lock")
            .clone()
    }

    /// Object factories consulted for references.
    #[must_use]
    pub fn factories(&self) -> &FactoryRegistry {
        &self.factories
    }

    /// Process default for skipping discovery.
    pub fn set_discovery_disabled(&self, disabled: bool) {
        self.discovery_disabled.store(disabled, Ordering::SeqCst);
    }

    /// Whether discovery is skipped unless a context says otherwise.
    #[must_use]
    pub fn discovery_disabled(&self) -> bool {
        self.discovery_disabled.load(Ordering::SeqCst)
    }
}
