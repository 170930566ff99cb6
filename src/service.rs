// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Naming service lifecycle: tree, RPC endpoint, bootstrap, and discovery.
// Author: Lukas Bower

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::{debug, info};

use crate::bootstrap::{BootstrapConfig, BootstrapListener};
use crate::config::{Environment, ServerConfig, CALL_BY_VALUE};
use crate::context::NamingContext;
use crate::discovery::DiscoveryResponder;
use crate::error::NamingError;
use crate::event::ExecutorEventMgr;
use crate::invoker::NamingInvoker;
use crate::name::{HostPort, Name};
use crate::naming::{Naming, NamingServerWrapper};
use crate::permission::PolicyChecker;
use crate::registry::NamingRegistry;
use crate::tree::NamingTree;

fn parse_ip(field: &str, text: &str) -> Result<IpAddr, NamingError> {
    text.trim()
        .parse()
        .map_err(|_| NamingError::Configuration(format!("invalid {field} {text:?}")))
}

/// A naming tree exposed to remote clients.
pub struct NamingService {
    config: ServerConfig,
    registry: Arc<NamingRegistry>,
    naming: Arc<dyn Naming>,
    invoker: Option<NamingInvoker>,
    bootstrap: Option<BootstrapListener>,
    responder: Option<DiscoveryResponder>,
    installed: bool,
}

impl fmt::Debug for NamingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingService")
            .field("instance", &format_args!("{:#x}", self.naming.instance_id()))
            .field("bootstrap", &self.bootstrap)
            .field("installed", &self.installed)
            .finish_non_exhaustive()
    }
}

impl NamingService {
    /// Prepare a service; nothing listens until [`start`](Self::start).
    ///
    /// An in-process server already installed in `registry` is adopted
    /// instead of building a new tree.
    pub fn new(config: ServerConfig, registry: Arc<NamingRegistry>) -> Result<Self, NamingError> {
        let naming: Arc<dyn Naming> = match registry.local_server() {
            Some(existing) => {
                info!(
                    "using existing naming server instance {:#x}",
                    existing.instance_id()
                );
                Arc::new(NamingServerWrapper::new(existing))
            }
            None => {
                let events = ExecutorEventMgr::new()
                    .map_err(|error| NamingError::io("failed to start naming event worker", error))?;
                let mut builder = NamingTree::builder().event_mgr(Arc::new(events));
                if !config.permissions.is_empty() {
                    let checker = PolicyChecker::from_grants(&config.permissions)
                        .map_err(|error| NamingError::Configuration(error.to_string()))?;
                    builder = builder.permission_checker(Arc::new(checker));
                }
                Arc::new(builder.build())
            }
        };
        Ok(Self {
            config,
            registry,
            naming,
            invoker: None,
            bootstrap: None,
            responder: None,
            installed: false,
        })
    }

    /// Start the RPC endpoint, bootstrap listener, and discovery responder.
    ///
    /// A negative port keeps the service in-process only.
    pub fn start(&mut self) -> Result<(), NamingError> {
        if self.config.port >= 0 {
            let rpc_ip = parse_ip("rpc bind address", &self.config.rpc_bind_address)?;
            let invoker = NamingInvoker::start(
                Arc::clone(&self.naming),
                SocketAddr::new(rpc_ip, self.config.rpc_port),
                self.config.timeout(),
            )
            .map_err(|error| NamingError::io("failed to start naming endpoint", error))?;
            let host = self.advertised_host(rpc_ip);
            let stub = invoker.stub(host.clone());
            debug!("naming stub {stub:?}");
            self.invoker = Some(invoker);

            let bootstrap =
                BootstrapListener::start(stub, &BootstrapConfig::from_server_config(&self.config)?)?;
            let port = bootstrap.port();
            self.bootstrap = Some(bootstrap);

            let discovery = &self.config.discovery;
            if discovery.enabled {
                let advertised = HostPort::new(host, u16::try_from(port).unwrap_or_default());
                let responder = DiscoveryResponder::start(
                    parse_ip("discovery bind address", &discovery.bind_address)?,
                    parse_ip("discovery group", &discovery.group)?,
                    discovery.port,
                    discovery.partition.clone(),
                    advertised,
                )
                .map_err(|error| NamingError::io("failed to start discovery responder", error))?;
                self.responder = Some(responder);
            }
        }
        if self.config.install_global {
            self.registry.set_local_server(Some(Arc::clone(&self.naming)));
            self.installed = true;
        }
        info!(
            "naming service started, bootstrap={}",
            self.bootstrap_url().unwrap_or("none")
        );
        Ok(())
    }

    fn advertised_host(&self, rpc_ip: IpAddr) -> String {
        match &self.config.advertised_host {
            Some(host) => host.clone(),
            None if rpc_ip.is_unspecified() => "127.0.0.1".to_owned(),
            None => rpc_ip.to_string(),
        }
    }

    /// Stop listening and uninstall the in-process server.
    pub fn stop(&mut self) {
        if let Some(mut responder) = self.responder.take() {
            responder.stop();
        }
        if let Some(mut bootstrap) = self.bootstrap.take() {
            bootstrap.stop();
        }
        if let Some(mut invoker) = self.invoker.take() {
            invoker.stop();
        }
        if self.installed {
            let ours = self
                .registry
                .local_server()
                .is_some_and(|local| local.instance_id() == self.naming.instance_id());
            if ours {
                self.registry.set_local_server(None);
            }
            self.installed = false;
        }
    }

    /// The served tree.
    #[must_use]
    pub fn naming(&self) -> Arc<dyn Naming> {
        Arc::clone(&self.naming)
    }

    /// First bootstrap URL, if the listener is running.
    #[must_use]
    pub fn bootstrap_url(&self) -> Option<&str> {
        self.bootstrap.as_ref().and_then(BootstrapListener::bootstrap_url)
    }

    /// Every bootstrap URL.
    #[must_use]
    pub fn bootstrap_urls(&self) -> Vec<String> {
        self.bootstrap
            .as_ref()
            .map(|bootstrap| bootstrap.bootstrap_urls().to_vec())
            .unwrap_or_default()
    }

    /// Bound bootstrap port, or the configured one when not listening.
    #[must_use]
    pub fn port(&self) -> i32 {
        self.bootstrap
            .as_ref()
            .map_or(self.config.port, BootstrapListener::port)
    }

    /// Address of the naming RPC endpoint.
    #[must_use]
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.invoker.as_ref().map(NamingInvoker::local_addr)
    }

    /// Address of the discovery responder.
    #[must_use]
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.responder.as_ref().map(DiscoveryResponder::local_addr)
    }

    /// Root context over the served tree, without a network hop.
    #[must_use]
    pub fn initial_context(&self, mut env: Environment) -> NamingContext {
        if self.config.call_by_value && env.get(CALL_BY_VALUE).is_none() {
            env.set(CALL_BY_VALUE, "true");
        }
        NamingContext::new(
            env,
            Name::empty(),
            Some(Arc::clone(&self.naming)),
            Arc::clone(&self.registry),
        )
    }
}

impl Drop for NamingService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Root context over the in-process server installed in `registry`.
pub fn local_context(
    registry: &Arc<NamingRegistry>,
    env: Environment,
) -> Result<NamingContext, NamingError> {
    let local = registry.local_server().ok_or_else(|| {
        NamingError::Configuration("no local naming server is installed".into())
    })?;
    Ok(NamingContext::new(
        env,
        Name::empty(),
        Some(local),
        Arc::clone(registry),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::NamingObject;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            bind_addresses: vec!["127.0.0.1".into()],
            port: 0,
            rpc_bind_address: "127.0.0.1".into(),
            rpc_port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn start_installs_and_stop_uninstalls_local_server() {
        let registry = Arc::new(NamingRegistry::new());
        let mut service = NamingService::new(loopback_config(), Arc::clone(&registry)).unwrap();
        service.start().unwrap();
        assert!(service.bootstrap_url().is_some());
        let context = local_context(&registry, Environment::new()).unwrap();
        context.bind("k", NamingObject::value("v")).unwrap();
        service.stop();
        assert!(registry.local_server().is_none());
        assert!(service.bootstrap_url().is_none());
    }

    #[test]
    fn existing_local_server_is_adopted() {
        let registry = Arc::new(NamingRegistry::new());
        let tree: Arc<dyn Naming> = Arc::new(NamingTree::new());
        registry.set_local_server(Some(Arc::clone(&tree)));
        let service = NamingService::new(
            ServerConfig {
                port: -1,
                ..ServerConfig::default()
            },
            Arc::clone(&registry),
        )
        .unwrap();
        assert_eq!(service.naming().instance_id(), tree.instance_id());
    }

    #[test]
    fn negative_port_serves_in_process_only() {
        let registry = Arc::new(NamingRegistry::new());
        let mut service = NamingService::new(
            ServerConfig {
                port: -1,
                ..ServerConfig::default()
            },
            Arc::clone(&registry),
        )
        .unwrap();
        service.start().unwrap();
        assert!(service.bootstrap_url().is_none());
        assert!(service.rpc_addr().is_none());
        assert_eq!(service.port(), -1);
        assert!(registry.local_server().is_some());
    }

    #[test]
    fn local_context_requires_installed_server() {
        let registry = Arc::new(NamingRegistry::new());
        match local_context(&registry, Environment::new()) {
            Err(NamingError::Configuration(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
