// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Naming event listeners, scope matching, and ordered delivery.
// Author: Lukas Bower

//! Change notification for the naming tree.
//!
//! Each tree node may own an [`EventListeners`] registry. When a node
//! changes, its registry is consulted for every scope and each ancestor's
//! registry is consulted for [`EventScope::Subtree`] only. Delivery goes
//! through an [`EventMgr`], either inline or on a single worker thread so
//! per-listener order matches operation order.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use log::{trace, warn};

use crate::binding::Binding;
use crate::name::Name;

/// Breadth of names a listener observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventScope {
    /// Only the target itself.
    Object,
    /// Direct children of the owning context.
    OneLevel,
    /// The target and everything below it.
    Subtree,
}

/// Scopes consulted on the node where a change happened.
pub const ALL_SCOPES: &[EventScope] = &[EventScope::Object, EventScope::OneLevel, EventScope::Subtree];
/// Scopes consulted on ancestors of that node.
pub const SUBTREE_ONLY: &[EventScope] = &[EventScope::Subtree];

/// Kind of change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A binding was created.
    ObjectAdded,
    /// A binding was removed.
    ObjectRemoved,
    /// A binding was renamed.
    ObjectRenamed,
    /// A binding was replaced.
    ObjectChanged,
}

/// Notification of a single tree change.
#[derive(Debug, Clone, PartialEq)]
pub struct NamingEvent {
    /// What happened.
    pub kind: EventKind,
    /// Absolute name of the changed binding.
    pub full_name: Name,
    /// Binding after the change.
    pub new_binding: Option<Binding>,
    /// Binding before the change.
    pub old_binding: Option<Binding>,
    /// Operation that produced the change, e.g. `"bind"`.
    pub change_info: String,
    /// Prefix of the context whose listeners received the event.
    pub source: Name,
}

/// Receives added/removed/renamed notifications.
pub trait NamespaceChangeListener {
    /// A binding was added.
    fn object_added(&self, event: &NamingEvent);
    /// A binding was removed.
    fn object_removed(&self, event: &NamingEvent);
    /// A binding was renamed.
    fn object_renamed(&self, event: &NamingEvent);
}

/// Receives changed notifications.
pub trait ObjectChangeListener {
    /// A binding was replaced.
    fn object_changed(&self, event: &NamingEvent);
}

/// Listener registered with the tree.
///
/// A listener advertises which notifications it handles through the
/// capability accessors. Events of a kind it does not handle are dropped.
pub trait NamingListener: Send + Sync {
    /// Namespace change capability.
    fn as_namespace_change(&self) -> Option<&dyn NamespaceChangeListener> {
        None
    }

    /// Object change capability.
    fn as_object_change(&self) -> Option<&dyn ObjectChangeListener> {
        None
    }
}

/// Deliver `event` to `listener` according to its capabilities.
pub fn dispatch(listener: &dyn NamingListener, event: &NamingEvent) {
    match event.kind {
        EventKind::ObjectAdded => {
            if let Some(target) = listener.as_namespace_change() {
                target.object_added(event);
            }
        }
        EventKind::ObjectRemoved => {
            if let Some(target) = listener.as_namespace_change() {
                target.object_removed(event);
            }
        }
        EventKind::ObjectRenamed => {
            if let Some(target) = listener.as_namespace_change() {
                target.object_renamed(event);
            }
        }
        EventKind::ObjectChanged => {
            if let Some(target) = listener.as_object_change() {
                target.object_changed(event);
            }
        }
    }
}

fn same_listener(a: &Arc<dyn NamingListener>, b: &Arc<dyn NamingListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Registration record: listener, absolute target, and scope.
#[derive(Clone)]
pub struct EventListenerInfo {
    listener: Arc<dyn NamingListener>,
    target: Name,
    scope: EventScope,
}

impl EventListenerInfo {
    /// Absolute target name.
    #[must_use]
    pub fn target(&self) -> &Name {
        &self.target
    }

    /// Registered scope.
    #[must_use]
    pub fn scope(&self) -> EventScope {
        self.scope
    }
}

impl fmt::Debug for EventListenerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListenerInfo")
            .field("target", &self.target)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Listener registry owned by one tree node.
pub struct EventListeners {
    owner: Name,
    listeners: RwLock<Vec<EventListenerInfo>>,
}

impl fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("owner", &self.owner)
            .field("count", &self.len())
            .finish()
    }
}

impl EventListeners {
    /// Registry for the node at `owner`.
    #[must_use]
    pub fn new(owner: Name) -> Self {
        Self {
            owner,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Prefix of the owning node.
    #[must_use]
    pub fn owner(&self) -> &Name {
        &self.owner
    }

    /// Register `listener` for `context_prefix` + `target`.
    pub fn add(
        &self,
        context_prefix: &Name,
        target: &Name,
        scope: EventScope,
        listener: Arc<dyn NamingListener>,
    ) {
        let info = EventListenerInfo {
            listener,
            target: context_prefix.concat(target),
            scope,
        };
        trace!("add naming listener {:?}", info);
        self.listeners
            .write()
            .expect("poisoned event listener lock")
            .push(info);
    }

    /// Remove every registration of `listener`. Returns whether any existed.
    pub fn remove(&self, listener: &Arc<dyn NamingListener>) -> bool {
        let mut listeners = self.listeners.write().expect("poisoned event listener lock");
        let before = listeners.len();
        listeners.retain(|info| !same_listener(&info.listener, listener));
        before != listeners.len()
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().expect("poisoned event listener lock").len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a registration matches the changed name.
    ///
    /// One-level matching compares depth only: any name one component deeper
    /// than the owning node matches, whatever the registered target.
    fn matches(&self, info: &EventListenerInfo, full_name: &Name) -> bool {
        match info.scope {
            EventScope::Subtree => full_name.starts_with(&info.target),
            EventScope::OneLevel => full_name.len() == self.owner.len() + 1,
            EventScope::Object => *full_name == info.target,
        }
    }

    /// Deliver `event` to matching registrations whose scope is in `scopes`.
    pub fn fire(&self, event: &NamingEvent, scopes: &[EventScope]) {
        let snapshot = self
            .listeners
            .read()
            .expect("poisoned event listener lock")
            .clone();
        trace!(
            "fire {:?} for {} on {} listeners of {}",
            event.kind,
            event.full_name,
            snapshot.len(),
            self.owner
        );
        let mut event = event.clone();
        event.source = self.owner.clone();
        for info in snapshot
            .iter()
            .filter(|info| scopes.contains(&info.scope))
            .filter(|info| self.matches(info, &event.full_name))
        {
            dispatch(info.listener.as_ref(), &event);
        }
    }
}

/// Event queued for one listener registry.
#[derive(Debug, Clone)]
pub struct EventDelivery {
    /// Event payload.
    pub event: NamingEvent,
    /// Registry to consult.
    pub listeners: Arc<EventListeners>,
    /// Scopes eligible on that registry.
    pub scopes: &'static [EventScope],
}

impl EventDelivery {
    fn deliver(&self) {
        self.listeners.fire(&self.event, self.scopes);
    }
}

/// Strategy for running event delivery.
pub trait EventMgr: Send + Sync {
    /// Deliver or schedule `delivery`.
    fn fire_event(&self, delivery: EventDelivery);
}

/// Delivers on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncEventMgr;

impl EventMgr for SyncEventMgr {
    fn fire_event(&self, delivery: EventDelivery) {
        delivery.deliver();
    }
}

/// Delivers on a single dedicated worker, preserving submission order.
pub struct ExecutorEventMgr {
    sender: Option<Sender<EventDelivery>>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for ExecutorEventMgr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorEventMgr")
            .field("running", &self.sender.is_some())
            .finish()
    }
}

impl ExecutorEventMgr {
    /// Spawn the delivery worker.
    pub fn new() -> io::Result<Self> {
        let (sender, receiver) = unbounded::<EventDelivery>();
        let worker = thread::Builder::new()
            .name("naming-events".into())
            .spawn(move || {
                for delivery in receiver.iter() {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| delivery.deliver()));
                    if outcome.is_err() {
                        warn!(
                            "naming listener panicked handling {:?} for {}",
                            delivery.event.kind, delivery.event.full_name
                        );
                    }
                }
            })?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }
}

impl EventMgr for ExecutorEventMgr {
    fn fire_event(&self, delivery: EventDelivery) {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if sender.send(delivery).is_err() {
            warn!("naming event worker has exited; event dropped");
        }
    }
}

impl Drop for ExecutorEventMgr {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain queued events and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("naming event worker terminated abnormally");
            }
        }
    }
}
