// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Client-side naming context: connection selection, retries, and result resolution.
// Author: Lukas Bower

//! Client resolver.
//!
//! A [`NamingContext`] holds an environment, an absolute prefix, and a lazily
//! acquired handle to a naming tree. Every operation:
//!
//! 1. strips a URL scheme from the name, turning embedded `host:port` into a
//!    per-call provider override,
//! 2. makes sure a handle is held (provider URLs, partition, discovery, then
//!    the in-process server),
//! 3. invokes the tree with the absolute name, refreshing a recycled handle
//!    once and retrying refused connections up to `nd.maxRetries`,
//! 4. hands federation continuations to the foreign context and turns raw
//!    lookup results into [`Resolved`] objects.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};
use serde_json::Value;

use crate::binding::{LinkRef, LookupResult, NameClassPair, NamingObject, Reference};
use crate::config::{Environment, PROVIDER_URL};
use crate::discovery::{should_discovery_happen, DiscoveryClient};
use crate::error::{BoxError, Continuation, NamingError};
use crate::event::{EventScope, NamingListener};
use crate::name::{parse_name_for_scheme, HostPort, Name, DEFAULT_BOOTSTRAP_PORT};
use crate::naming::Naming;
use crate::registry::NamingRegistry;

const CONNECT_RETRY_PAUSE: Duration = Duration::from_millis(1);
/// Links followed by one lookup before it is treated as a cycle.
pub const MAX_LINK_HOPS: u32 = 32;

/// Object produced by a client lookup.
pub enum Resolved {
    /// Plain value.
    Value(Arc<Value>),
    /// Subcontext carrying the caller's environment.
    Context(NamingContext),
    /// Reference no factory rebuilt.
    Reference(Reference),
    /// Link returned without being followed.
    Link(LinkRef),
    /// Object built by a factory.
    Object(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolved::Context(context) => f.debug_tuple("Context").field(context).finish(),
            Resolved::Reference(reference) => f.debug_tuple("Reference").field(reference).finish(),
            Resolved::Link(link) => f.debug_tuple("Link").field(link).finish(),
            Resolved::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl Resolved {
    /// The value, if this is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Arc<Value>> {
        match self {
            Resolved::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The context, if this is one.
    #[must_use]
    pub fn into_context(self) -> Option<NamingContext> {
        match self {
            Resolved::Context(context) => Some(context),
            _ => None,
        }
    }

    /// The link, if this is one.
    #[must_use]
    pub fn as_link(&self) -> Option<&LinkRef> {
        match self {
            Resolved::Link(link) => Some(link),
            _ => None,
        }
    }

    /// Factory-built object of type `T`.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Resolved::Object(object) => Arc::clone(object).downcast::<T>().ok(),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Resolved::Value(value) => value.to_string(),
            Resolved::Context(context) => context.name_in_namespace(),
            Resolved::Reference(reference) => reference.class_name.clone(),
            Resolved::Link(link) => link.link_name().to_owned(),
            Resolved::Object(_) => "object".to_owned(),
        }
    }
}

/// Binding returned by [`NamingContext::list_bindings`].
#[derive(Debug)]
pub struct ResolvedBinding {
    /// Key relative to the listed context.
    pub name: String,
    /// Type tag.
    pub class_name: String,
    /// Resolved object.
    pub object: Resolved,
}

struct ContextState {
    env: Environment,
    naming: Option<Arc<dyn Naming>>,
    host_key: Option<String>,
}

/// Handle and environment one operation runs with.
struct Target {
    env: Environment,
    naming: Arc<dyn Naming>,
    host_key: Option<String>,
    per_call: bool,
}

/// Client view of a naming tree rooted at an absolute prefix.
pub struct NamingContext {
    prefix: Name,
    registry: Arc<NamingRegistry>,
    state: Mutex<ContextState>,
}

impl fmt::Debug for NamingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().expect("poisoned naming context lock");
        f.debug_struct("NamingContext")
            .field("prefix", &self.prefix)
            .field("connected", &state.naming.is_some())
            .field("server", &state.host_key)
            .finish_non_exhaustive()
    }
}

impl NamingContext {
    /// Context at `prefix` over an optional pre-acquired handle.
    #[must_use]
    pub fn new(
        env: Environment,
        prefix: Name,
        naming: Option<Arc<dyn Naming>>,
        registry: Arc<NamingRegistry>,
    ) -> Self {
        Self {
            prefix,
            registry,
            state: Mutex::new(ContextState {
                env,
                naming,
                host_key: None,
            }),
        }
    }

    /// Root context that connects on first use.
    #[must_use]
    pub fn initial(env: Environment, registry: Arc<NamingRegistry>) -> Self {
        Self::new(env, Name::empty(), None, registry)
    }

    /// Absolute prefix of this context.
    #[must_use]
    pub fn prefix(&self) -> &Name {
        &self.prefix
    }

    /// Registry this context resolves through.
    #[must_use]
    pub fn registry(&self) -> &Arc<NamingRegistry> {
        &self.registry
    }

    /// Whether a handle is currently held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .expect("poisoned naming context lock")
            .naming
            .is_some()
    }

    // Connection management

    fn prepare(&self, name: &Name) -> Result<(Target, Name), NamingError> {
        let parsed = parse_name_for_scheme(name);
        if let Some(server) = parsed.server_info {
            let mut env = self.environment();
            env.set(PROVIDER_URL, server);
            let (naming, host_key) = self.check_connection(&env)?;
            return Ok((
                Target {
                    env,
                    naming,
                    host_key,
                    per_call: true,
                },
                parsed.name,
            ));
        }
        let (env, held) = {
            let state = self.state.lock().expect("poisoned naming context lock");
            let held = state
                .naming
                .as_ref()
                .map(|naming| (Arc::clone(naming), state.host_key.clone()));
            (state.env.clone(), held)
        };
        let (naming, host_key) = match held {
            Some(held) => held,
            None => {
                let (naming, host_key) = self.check_connection(&env)?;
                let mut state = self.state.lock().expect("poisoned naming context lock");
                state.naming = Some(Arc::clone(&naming));
                state.host_key = host_key.clone();
                (naming, host_key)
            }
        };
        Ok((
            Target {
                env,
                naming,
                host_key,
                per_call: false,
            },
            parsed.name,
        ))
    }

    /// Find a server: provider URLs in order, then the partition, then
    /// discovery, then the in-process server.
    fn check_connection(
        &self,
        env: &Environment,
    ) -> Result<(Arc<dyn Naming>, Option<String>), NamingError> {
        let urls = env.provider_urls();
        if !urls.is_empty() {
            let mut server_error = None;
            for url in &urls {
                let outcome = HostPort::parse_url(url, DEFAULT_BOOTSTRAP_PORT)
                    .and_then(|endpoint| {
                        self.registry
                            .get_server(&endpoint, env)
                            .map(|naming| (naming, endpoint.to_string()))
                    });
                match outcome {
                    Ok((naming, key)) => {
                        trace!("connected to naming server {key}");
                        return Ok((naming, Some(key)));
                    }
                    Err(error) => {
                        debug!("failed to connect to {url}: {error}");
                        server_error.get_or_insert(error);
                    }
                }
            }
            let discovery_error = match self.discover(env) {
                Ok(Some(found)) => return Ok(found),
                Ok(None) => None,
                Err(error) => Some(error),
            };
            let mut message = format!(
                "could not obtain connection to any of these urls: {}",
                urls.join(",")
            );
            if let Some(error) = &discovery_error {
                message.push_str(&format!(" and discovery failed with error: {error}"));
            }
            let cause = server_error.or(discovery_error);
            return Err(NamingError::communication(
                message,
                cause.map(|error| Box::new(error) as BoxError),
            ));
        }

        if let Some(partition) = env.partition_name() {
            return match self.discover(env)? {
                Some(found) => Ok(found),
                None => Err(NamingError::Configuration(format!(
                    "no valid context could be built for partition {partition}"
                ))),
            };
        }

        let discovery_error = match self.discover(env) {
            Ok(Some(found)) => return Ok(found),
            Ok(None) => None,
            Err(error) => Some(error),
        };
        if let Some(local) = self.registry.local_server() {
            trace!("using in-process naming server");
            return Ok((local, None));
        }
        match discovery_error {
            Some(error) => Err(NamingError::communication(
                "no naming server found",
                Some(Box::new(error)),
            )),
            None => Err(NamingError::Configuration(
                "no valid provider url was found".into(),
            )),
        }
    }

    /// `Ok(None)` when discovery is disabled for this environment.
    fn discover(
        &self,
        env: &Environment,
    ) -> Result<Option<(Arc<dyn Naming>, Option<String>)>, NamingError> {
        if !should_discovery_happen(self.registry.discovery_disabled(), env.disable_discovery()) {
            trace!("skipping discovery due to disable flag");
            return Ok(None);
        }
        if let Some(partition) = env.partition_name() {
            if let Some(naming) = self.registry.partition(partition) {
                return Ok(Some((naming, None)));
            }
        }
        let endpoint = DiscoveryClient::from_env(env)?.discover()?;
        let naming = self.registry.get_server(&endpoint, env)?;
        Ok(Some((naming, Some(endpoint.to_string()))))
    }

    fn drop_connection(&self, target: &Target) {
        if let Some(key) = &target.host_key {
            self.registry.remove_server(key);
        }
        if !target.per_call {
            let mut state = self.state.lock().expect("poisoned naming context lock");
            state.naming = None;
            state.host_key = None;
        }
    }

    fn refresh(&self, target: &mut Target, stale: NamingError) -> Result<(), NamingError> {
        debug!("naming handle is stale, flushing cache and reconnecting: {stale}");
        self.drop_connection(target);
        let (naming, host_key) = self.check_connection(&target.env).map_err(|error| {
            warn!("could not re-establish naming after stale handle: {error}");
            NamingError::communication(
                format!("reconnect after stale handle ({stale}) failed"),
                Some(Box::new(error)),
            )
        })?;
        if !target.per_call {
            let mut state = self.state.lock().expect("poisoned naming context lock");
            state.naming = Some(Arc::clone(&naming));
            state.host_key = host_key.clone();
        }
        target.naming = naming;
        target.host_key = host_key;
        Ok(())
    }

    /// Run `op`, refreshing a stale handle once and retrying refused connects.
    fn call<T>(
        &self,
        target: &mut Target,
        op: &dyn Fn(&dyn Naming) -> Result<T, NamingError>,
    ) -> Result<T, NamingError> {
        let max_tries = target.env.max_retries()?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match op(target.naming.as_ref()) {
                Err(error) if error.is_stale() => {
                    self.refresh(target, error)?;
                    op(target.naming.as_ref())
                }
                other => other,
            };
            match outcome {
                Err(error) if error.is_connect_refused() && attempt < max_tries => {
                    trace!("connect failed, retry count: {}", max_tries - attempt);
                    thread::sleep(CONNECT_RETRY_PAUSE);
                }
                Err(
                    error @ (NamingError::ConnectRefused { .. }
                    | NamingError::StaleHandle(_)
                    | NamingError::CommunicationFailure { .. }),
                ) => {
                    self.drop_connection(target);
                    return Err(match error {
                        NamingError::CommunicationFailure { .. } => error,
                        other => NamingError::communication(other.to_string(), Some(Box::new(other))),
                    });
                }
                other => return other,
            }
        }
    }

    /// Context that continues an operation past a federation point.
    fn continuation_context(
        &self,
        continuation: &Continuation,
        target: &Target,
        hops: u32,
    ) -> Result<NamingContext, NamingError> {
        let resolved = match &continuation.resolved {
            NamingObject::Reference(reference) => {
                let name = self.hook_name(&Name::empty(), &target.env);
                self.registry
                    .factories()
                    .get_object_instance(reference, &name, &target.env)?
            }
            NamingObject::Context(context) => Resolved::Context(self.derive(
                target,
                context.prefix.clone(),
            )),
            NamingObject::Link(link) => self.resolve_link(link, target, hops)?,
            NamingObject::Value(value) => {
                Resolved::Value(value.get(target.env.call_by_value())?)
            }
        };
        match resolved {
            Resolved::Context(context) => Ok(context),
            other => Err(NamingError::NotContext(format!(
                "{} is not a context",
                other.describe()
            ))),
        }
    }

    fn derive(&self, target: &Target, prefix: Name) -> NamingContext {
        let context = NamingContext::new(
            target.env.clone(),
            prefix,
            Some(Arc::clone(&target.naming)),
            Arc::clone(&self.registry),
        );
        context
            .state
            .lock()
            .expect("poisoned naming context lock")
            .host_key
            .clone_from(&target.host_key);
        context
    }

    // Name handling

    fn absolute_name(&self, name: &Name) -> Name {
        if name.is_empty() {
            self.prefix.clone()
        } else if name.get(0) == Some("") {
            name.suffix(1)
        } else {
            self.prefix.concat(name)
        }
    }

    fn hook_name(&self, name: &Name, env: &Environment) -> Name {
        if env.use_absolute_name() {
            self.absolute_name(name)
        } else {
            name.clone()
        }
    }

    /// Parse `text` with the naming syntax.
    pub fn parse_name(&self, text: &str) -> Result<Name, NamingError> {
        Name::parse(text)
    }

    /// `prefix` followed by `name`.
    #[must_use]
    pub fn compose_name(&self, name: &Name, prefix: &Name) -> Name {
        prefix.concat(name)
    }

    /// Absolute name of this context.
    #[must_use]
    pub fn name_in_namespace(&self) -> String {
        self.prefix.to_string()
    }

    // Environment

    /// Set an environment entry, returning the previous value.
    pub fn add_to_environment(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.state
            .lock()
            .expect("poisoned naming context lock")
            .env
            .set(key, value)
    }

    /// Remove an environment entry, returning it.
    pub fn remove_from_environment(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .expect("poisoned naming context lock")
            .env
            .remove(key)
    }

    /// Copy of the environment.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.state
            .lock()
            .expect("poisoned naming context lock")
            .env
            .clone()
    }

    /// Release the held handle and clear the environment.
    ///
    /// Calls already in flight are not interrupted.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("poisoned naming context lock");
        state.naming = None;
        state.host_key = None;
        state.env.clear();
    }

    // Result post-processing

    fn resolve_link(
        &self,
        link: &LinkRef,
        target: &Target,
        hops: u32,
    ) -> Result<Resolved, NamingError> {
        if hops >= MAX_LINK_HOPS {
            return Err(NamingError::NameNotFound(format!(
                "link cycle at {}: more than {MAX_LINK_HOPS} links followed",
                link.link_name()
            )));
        }
        trace!("dereferencing link {}", link.link_name());
        match link.relative_target() {
            Some(relative) => self.lookup_with(&Name::parse(relative)?, true, hops + 1),
            None => {
                let root = NamingContext::new(
                    target.env.clone(),
                    Name::empty(),
                    Some(Arc::clone(&target.naming)),
                    Arc::clone(&self.registry),
                );
                root.lookup_with(&Name::parse(link.link_name())?, true, hops + 1)
            }
        }
    }

    fn object_instance(
        &self,
        reference: &Reference,
        name: &Name,
        target: &Target,
    ) -> Result<Resolved, NamingError> {
        let name = self.hook_name(name, &target.env);
        self.registry
            .factories()
            .get_object_instance(reference, &name, &target.env)
    }

    fn resolve_object(
        &self,
        object: NamingObject,
        name: &Name,
        target: &Target,
        follow_links: bool,
        hops: u32,
    ) -> Result<Resolved, NamingError> {
        match object {
            NamingObject::Value(value) => Ok(Resolved::Value(value.get(target.env.call_by_value())?)),
            NamingObject::Context(context) => Ok(Resolved::Context(self.derive(target, context.prefix))),
            NamingObject::Link(link) if follow_links => self.resolve_link(&link, target, hops),
            NamingObject::Link(link) => Ok(Resolved::Link(link)),
            NamingObject::Reference(reference) => {
                match self.object_instance(&reference, name, target)? {
                    Resolved::Link(link) if follow_links => self.resolve_link(&link, target, hops),
                    resolved => Ok(resolved),
                }
            }
        }
    }

    fn resolve_lookup(
        &self,
        raw: LookupResult,
        name: &Name,
        target: &Target,
        follow_links: bool,
        hops: u32,
    ) -> Result<Resolved, NamingError> {
        match raw {
            LookupResult::Object(object) => {
                self.resolve_object(object, name, target, follow_links, hops)
            }
            LookupResult::Resolve(partial) => {
                let (context, label) = match partial.resolved {
                    NamingObject::Link(link) => {
                        let label = link.link_name().to_owned();
                        (self.resolve_link(&link, target, hops)?, label)
                    }
                    NamingObject::Reference(reference) => {
                        let resolved = self.object_instance(&reference, name, target)?;
                        let label = resolved.describe();
                        (resolved, label)
                    }
                    other => {
                        let resolved = self.resolve_object(other, name, target, true, hops)?;
                        let label = resolved.describe();
                        (resolved, label)
                    }
                };
                match context {
                    Resolved::Context(context) => {
                        context.lookup_with(&partial.remaining, follow_links, hops)
                    }
                    _ => Err(NamingError::NotContext(format!("{label} is not a context"))),
                }
            }
        }
    }

    // Operations

    /// Resolve `name`, following links and rebuilding references.
    pub fn lookup(&self, name: &str) -> Result<Resolved, NamingError> {
        self.lookup_name(&Name::parse(name)?)
    }

    /// [`lookup`](Self::lookup) with a parsed name.
    pub fn lookup_name(&self, name: &Name) -> Result<Resolved, NamingError> {
        self.lookup_with(name, true, 0)
    }

    /// Like [`lookup`](Self::lookup) but a terminal link is returned unfollowed.
    pub fn lookup_link(&self, name: &str) -> Result<Resolved, NamingError> {
        self.lookup_link_name(&Name::parse(name)?)
    }

    /// [`lookup_link`](Self::lookup_link) with a parsed name.
    pub fn lookup_link_name(&self, name: &Name) -> Result<Resolved, NamingError> {
        self.lookup_with(name, false, 0)
    }

    fn lookup_with(
        &self,
        name: &Name,
        follow_links: bool,
        hops: u32,
    ) -> Result<Resolved, NamingError> {
        let (mut target, name) = self.prepare(name)?;
        if name.is_empty() {
            return Ok(Resolved::Context(self.derive(&target, self.prefix.clone())));
        }
        let absolute = self.absolute_name(&name);
        let outcome = self.call(&mut target, &|naming| naming.lookup(&absolute));
        match outcome {
            Err(NamingError::CannotProceed(continuation)) => {
                let context = self.continuation_context(&continuation, &target, hops)?;
                context.lookup_with(&continuation.remaining, follow_links, hops)
            }
            Err(error) => Err(error),
            Ok(raw) => self.resolve_lookup(raw, &name, &target, follow_links, hops),
        }
    }

    /// Bind `object` under a new name.
    pub fn bind(&self, name: &str, object: NamingObject) -> Result<(), NamingError> {
        self.bind_name(&Name::parse(name)?, object)
    }

    /// [`bind`](Self::bind) with a parsed name.
    pub fn bind_name(&self, name: &Name, object: NamingObject) -> Result<(), NamingError> {
        let (mut target, name) = self.prepare(name)?;
        let absolute = self.absolute_name(&name);
        let class_name = object.class_name().to_owned();
        let outcome = self.call(&mut target, &|naming| {
            naming.bind(&absolute, object.clone(), &class_name)
        });
        match outcome {
            Err(NamingError::CannotProceed(continuation)) => self
                .continuation_context(&continuation, &target, 0)?
                .bind_name(&continuation.remaining, object),
            other => other,
        }
    }

    /// Bind `object`, replacing any existing binding.
    pub fn rebind(&self, name: &str, object: NamingObject) -> Result<(), NamingError> {
        self.rebind_name(&Name::parse(name)?, object)
    }

    /// [`rebind`](Self::rebind) with a parsed name.
    pub fn rebind_name(&self, name: &Name, object: NamingObject) -> Result<(), NamingError> {
        let (mut target, name) = self.prepare(name)?;
        let absolute = self.absolute_name(&name);
        let class_name = object.class_name().to_owned();
        let outcome = self.call(&mut target, &|naming| {
            naming.rebind(&absolute, object.clone(), &class_name)
        });
        match outcome {
            Err(NamingError::CannotProceed(continuation)) => self
                .continuation_context(&continuation, &target, 0)?
                .rebind_name(&continuation.remaining, object),
            other => other,
        }
    }

    /// Remove a binding.
    pub fn unbind(&self, name: &str) -> Result<(), NamingError> {
        self.unbind_name(&Name::parse(name)?)
    }

    /// [`unbind`](Self::unbind) with a parsed name.
    pub fn unbind_name(&self, name: &Name) -> Result<(), NamingError> {
        let (mut target, name) = self.prepare(name)?;
        let absolute = self.absolute_name(&name);
        let outcome = self.call(&mut target, &|naming| naming.unbind(&absolute));
        match outcome {
            Err(NamingError::CannotProceed(continuation)) => self
                .continuation_context(&continuation, &target, 0)?
                .unbind_name(&continuation.remaining),
            other => other,
        }
    }

    /// Names and type tags bound in the context at `name`.
    pub fn list(&self, name: &str) -> Result<Vec<NameClassPair>, NamingError> {
        self.list_name(&Name::parse(name)?)
    }

    /// [`list`](Self::list) with a parsed name.
    pub fn list_name(&self, name: &Name) -> Result<Vec<NameClassPair>, NamingError> {
        let (mut target, name) = self.prepare(name)?;
        let absolute = self.absolute_name(&name);
        let outcome = self.call(&mut target, &|naming| naming.list(&absolute));
        match outcome {
            Err(NamingError::CannotProceed(continuation)) => self
                .continuation_context(&continuation, &target, 0)?
                .list_name(&continuation.remaining),
            other => other,
        }
    }

    /// Bindings of the context at `name` with their objects resolved.
    ///
    /// Links are returned unfollowed.
    pub fn list_bindings(&self, name: &str) -> Result<Vec<ResolvedBinding>, NamingError> {
        self.list_bindings_name(&Name::parse(name)?)
    }

    /// [`list_bindings`](Self::list_bindings) with a parsed name.
    pub fn list_bindings_name(&self, name: &Name) -> Result<Vec<ResolvedBinding>, NamingError> {
        let (mut target, name) = self.prepare(name)?;
        let absolute = self.absolute_name(&name);
        let outcome = self.call(&mut target, &|naming| naming.list_bindings(&absolute));
        let bindings = match outcome {
            Err(NamingError::CannotProceed(continuation)) => {
                return self
                    .continuation_context(&continuation, &target, 0)?
                    .list_bindings_name(&continuation.remaining);
            }
            other => other?,
        };
        bindings
            .into_iter()
            .map(|binding| {
                let mut bound = name.clone();
                bound.push(binding.name.clone());
                let object = self.resolve_object(binding.object, &bound, &target, false, 0)?;
                Ok(ResolvedBinding {
                    name: binding.name,
                    class_name: binding.class_name,
                    object,
                })
            })
            .collect()
    }

    /// Create an empty subcontext.
    pub fn create_subcontext(&self, name: &str) -> Result<NamingContext, NamingError> {
        self.create_subcontext_name(&Name::parse(name)?)
    }

    /// [`create_subcontext`](Self::create_subcontext) with a parsed name.
    pub fn create_subcontext_name(&self, name: &Name) -> Result<NamingContext, NamingError> {
        let (mut target, name) = self.prepare(name)?;
        let absolute = self.absolute_name(&name);
        let outcome = self.call(&mut target, &|naming| naming.create_subcontext(&absolute));
        match outcome {
            Err(NamingError::CannotProceed(continuation)) => self
                .continuation_context(&continuation, &target, 0)?
                .create_subcontext_name(&continuation.remaining),
            Err(error) => Err(error),
            Ok(context) => Ok(self.derive(&target, context.prefix)),
        }
    }

    /// Remove an empty subcontext.
    pub fn destroy_subcontext(&self, name: &str) -> Result<(), NamingError> {
        self.destroy_subcontext_name(&Name::parse(name)?)
    }

    /// [`destroy_subcontext`](Self::destroy_subcontext) with a parsed name.
    pub fn destroy_subcontext_name(&self, name: &Name) -> Result<(), NamingError> {
        if !self.list_name(name)?.is_empty() {
            return Err(NamingError::ContextNotEmpty(name.to_string()));
        }
        self.unbind_name(name)
    }

    /// Move the object bound at `old_name` to `new_name`.
    ///
    /// Subcontexts cannot be renamed.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<(), NamingError> {
        self.rename_name(&Name::parse(old_name)?, &Name::parse(new_name)?)
    }

    /// [`rename`](Self::rename) with parsed names.
    pub fn rename_name(&self, old_name: &Name, new_name: &Name) -> Result<(), NamingError> {
        let (mut target, name) = self.prepare(old_name)?;
        let absolute = self.absolute_name(&name);
        let outcome = self.call(&mut target, &|naming| naming.lookup(&absolute));
        let object = match outcome {
            Ok(LookupResult::Object(NamingObject::Context(_))) => {
                return Err(NamingError::OperationNotSupported(format!(
                    "cannot rename subcontext {name}"
                )));
            }
            Ok(LookupResult::Object(object)) => object,
            Ok(LookupResult::Resolve(_)) | Err(NamingError::CannotProceed(_)) => {
                return Err(NamingError::OperationNotSupported(format!(
                    "cannot rename {name} across namespaces"
                )));
            }
            Err(error) => return Err(error),
        };
        self.bind_name(new_name, object)?;
        self.unbind_name(old_name)
    }

    /// Register `listener` for changes to `target` relative to this context.
    ///
    /// Only handles reaching an in-process tree support listeners.
    pub fn add_naming_listener(
        &self,
        target: &str,
        scope: EventScope,
        listener: Arc<dyn NamingListener>,
    ) -> Result<(), NamingError> {
        let (handle, name) = self.prepare(&Name::parse(target)?)?;
        let tree = handle.naming.as_tree().ok_or_else(|| {
            NamingError::OperationNotSupported("naming listeners need an in-process tree".into())
        })?;
        if name.get(0) == Some("") {
            tree.add_naming_listener(&Name::empty(), &name.suffix(1), scope, listener)
        } else {
            tree.add_naming_listener(&self.prefix, &name, scope, listener)
        }
    }

    /// Drop every registration of `listener`. Returns whether any existed.
    pub fn remove_naming_listener(
        &self,
        listener: &Arc<dyn NamingListener>,
    ) -> Result<bool, NamingError> {
        let (handle, _) = self.prepare(&Name::empty())?;
        let tree = handle.naming.as_tree().ok_or_else(|| {
            NamingError::OperationNotSupported("naming listeners need an in-process tree".into())
        })?;
        Ok(tree.remove_naming_listener(listener))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DISABLE_DISCOVERY;
    use crate::tree::NamingTree;
    use serde_json::json;

    fn local_context() -> NamingContext {
        let registry = Arc::new(NamingRegistry::new());
        registry.set_local_server(Some(Arc::new(NamingTree::new())));
        NamingContext::initial(
            Environment::new().with(DISABLE_DISCOVERY, "true"),
            registry,
        )
    }

    #[test]
    fn subcontexts_resolve_relative_to_their_prefix() {
        let root = local_context();
        let app = root.create_subcontext("app").unwrap();
        assert_eq!(app.name_in_namespace(), "app");
        app.bind("port", NamingObject::value(8080)).unwrap();
        let value = root.lookup("app/port").unwrap();
        assert_eq!(**value.as_value().unwrap(), json!(8080));
        let absolute = app.lookup("/app/port").unwrap();
        assert_eq!(**absolute.as_value().unwrap(), json!(8080));
    }

    #[test]
    fn empty_lookup_returns_context_for_prefix() {
        let root = local_context();
        root.create_subcontext("a").unwrap();
        let a = root.lookup("a").unwrap().into_context().unwrap();
        let same = a.lookup("").unwrap().into_context().unwrap();
        assert_eq!(same.prefix(), a.prefix());
    }

    #[test]
    fn environment_is_copied_into_child_contexts() {
        let root = local_context();
        root.add_to_environment("custom.key", "1");
        let child = root.create_subcontext("child").unwrap();
        assert_eq!(child.environment().get("custom.key"), Some("1"));
        assert_eq!(root.remove_from_environment("custom.key").as_deref(), Some("1"));
        assert_eq!(child.environment().get("custom.key"), Some("1"));
    }

    #[test]
    fn close_releases_handle_and_environment() {
        let root = local_context();
        root.bind("x", NamingObject::value(1)).unwrap();
        assert!(root.is_connected());
        root.close();
        assert!(!root.is_connected());
        assert!(root.environment().is_empty());
    }

    #[test]
    fn compose_name_appends_to_prefix() {
        let root = local_context();
        let composed = root.compose_name(
            &Name::parse("c/d").unwrap(),
            &Name::parse("a/b").unwrap(),
        );
        assert_eq!(composed.to_string(), "a/b/c/d");
    }

    #[test]
    fn no_server_and_no_discovery_is_a_configuration_error() {
        let registry = Arc::new(NamingRegistry::new());
        let context = NamingContext::initial(
            Environment::new().with(DISABLE_DISCOVERY, "true"),
            registry,
        );
        match context.lookup("anything") {
            Err(NamingError::Configuration(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
