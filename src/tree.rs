// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Recursive hierarchical naming tree backed by an index-addressed node arena.
// Author: Lukas Bower

//! Server-side naming tree.
//!
//! Nodes live in an arena and refer to each other by index. A subcontext is a
//! table slot holding the child's index; the parent index is kept only for
//! event propagation. Each node serialises changes to its own table, and no
//! table lock is held while recursing into a child or delivering events.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace};

use crate::binding::{
    Binding, ContextRef, LookupResult, NameClassPair, NamingObject, ResolveResult,
    CONTEXT_CLASS_NAME,
};
use crate::error::{Continuation, NamingError};
use crate::event::{
    EventDelivery, EventKind, EventListeners, EventMgr, EventScope, NamingEvent, NamingListener,
    SyncEventMgr, ALL_SCOPES, SUBTREE_ONLY,
};
use crate::name::Name;
use crate::naming::Naming;
use crate::permission::{Actions, AllowAll, NamingPermission, PermissionChecker};

/// Index of a node in the arena.
pub type NodeId = usize;

const ROOT: NodeId = 0;

enum Slot {
    Object(Binding),
    Node(NodeId),
}

struct TreeNode {
    prefix: Name,
    parent: Option<NodeId>,
    table: Mutex<HashMap<String, Slot>>,
    listeners: Mutex<Option<Arc<EventListeners>>>,
}

impl TreeNode {
    fn new(prefix: Name, parent: Option<NodeId>) -> Self {
        Self {
            prefix,
            parent,
            table: Mutex::new(HashMap::new()),
            listeners: Mutex::new(None),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.table.lock().expect("poisoned naming node lock")
    }

    fn listeners(&self) -> Option<Arc<EventListeners>> {
        self.listeners
            .lock()
            .expect("poisoned naming listener slot")
            .clone()
    }

    fn context_binding(&self, key: &str) -> Binding {
        let mut prefix = self.prefix.clone();
        prefix.push(key);
        Binding::new(
            key,
            CONTEXT_CLASS_NAME,
            NamingObject::Context(ContextRef::new(prefix)),
        )
    }

    fn not_bound(&self, key: &str) -> NamingError {
        if self.prefix.is_empty() {
            NamingError::NameNotFound(format!("{key} not bound"))
        } else {
            NamingError::NameNotFound(format!("{key} not bound in {}", self.prefix))
        }
    }
}

enum Step {
    Node(NodeId),
    Partial(NamingObject),
}

fn next_instance_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default();
    nanos.rotate_left(16) ^ COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Builder for [`NamingTree`].
pub struct NamingTreeBuilder {
    event_mgr: Option<Arc<dyn EventMgr>>,
    checker: Arc<dyn PermissionChecker>,
}

impl NamingTreeBuilder {
    /// Deliver events through `event_mgr`.
    #[must_use]
    pub fn event_mgr(mut self, event_mgr: Arc<dyn EventMgr>) -> Self {
        self.event_mgr = Some(event_mgr);
        self
    }

    /// Skip event delivery entirely.
    #[must_use]
    pub fn without_events(mut self) -> Self {
        self.event_mgr = None;
        self
    }

    /// Consult `checker` before every operation.
    #[must_use]
    pub fn permission_checker(mut self, checker: Arc<dyn PermissionChecker>) -> Self {
        self.checker = checker;
        self
    }

    /// Build an empty tree.
    #[must_use]
    pub fn build(self) -> NamingTree {
        NamingTree {
            nodes: RwLock::new(vec![Some(Arc::new(TreeNode::new(Name::empty(), None)))]),
            instance: next_instance_id(),
            event_mgr: self.event_mgr,
            checker: self.checker,
        }
    }
}

/// Hierarchical naming tree.
pub struct NamingTree {
    nodes: RwLock<Vec<Option<Arc<TreeNode>>>>,
    instance: u64,
    event_mgr: Option<Arc<dyn EventMgr>>,
    checker: Arc<dyn PermissionChecker>,
}

impl fmt::Debug for NamingTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingTree")
            .field("instance", &format_args!("{:#x}", self.instance))
            .field("events", &self.event_mgr.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for NamingTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NamingTree {
    /// Tree with synchronous events and no permission restrictions.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a tree.
    #[must_use]
    pub fn builder() -> NamingTreeBuilder {
        NamingTreeBuilder {
            event_mgr: Some(Arc::new(SyncEventMgr)),
            checker: Arc::new(AllowAll),
        }
    }

    /// Register `listener` for `target`, relative to the context at `context_prefix`.
    ///
    /// The registration is owned by the deepest existing subcontext along the
    /// target path (its parent for object scope), so changes in that context
    /// reach the listener with every scope.
    pub fn add_naming_listener(
        &self,
        context_prefix: &Name,
        target: &Name,
        scope: EventScope,
        listener: Arc<dyn NamingListener>,
    ) -> Result<(), NamingError> {
        let absolute = context_prefix.concat(target);
        let search = match scope {
            EventScope::Object => absolute.prefix(absolute.len().saturating_sub(1)),
            EventScope::OneLevel | EventScope::Subtree => absolute,
        };
        let owner = self.deepest_node(&search)?;
        let registry = {
            let mut slot = owner
                .listeners
                .lock()
                .expect("poisoned naming listener slot");
            Arc::clone(slot.get_or_insert_with(|| Arc::new(EventListeners::new(owner.prefix.clone()))))
        };
        debug!(
            "naming listener for {} ({scope:?}) owned by {}",
            context_prefix.concat(target),
            owner.prefix
        );
        registry.add(context_prefix, target, scope, listener);
        Ok(())
    }

    /// Drop every registration of `listener`. Returns whether any existed.
    pub fn remove_naming_listener(&self, listener: &Arc<dyn NamingListener>) -> bool {
        let nodes: Vec<Arc<TreeNode>> = self
            .nodes
            .read()
            .expect("poisoned naming arena lock")
            .iter()
            .flatten()
            .cloned()
            .collect();
        let mut removed = false;
        for node in nodes {
            if let Some(listeners) = node.listeners() {
                removed |= listeners.remove(listener);
            }
        }
        removed
    }

    /// Number of live nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes
            .read()
            .expect("poisoned naming arena lock")
            .iter()
            .flatten()
            .count()
    }

    fn node(&self, id: NodeId) -> Result<Arc<TreeNode>, NamingError> {
        self.nodes
            .read()
            .expect("poisoned naming arena lock")
            .get(id)
            .and_then(Clone::clone)
            .ok_or_else(|| NamingError::NameNotFound(format!("context #{id} was removed")))
    }

    fn allocate(&self, node: TreeNode) -> NodeId {
        let mut nodes = self.nodes.write().expect("poisoned naming arena lock");
        nodes.push(Some(Arc::new(node)));
        nodes.len() - 1
    }

    fn release_subtree(&self, root: NodeId) {
        let mut pending = vec![root];
        let mut released = Vec::new();
        while let Some(id) = pending.pop() {
            if let Ok(node) = self.node(id) {
                pending.extend(node.table().values().filter_map(|slot| match slot {
                    Slot::Node(child) => Some(*child),
                    Slot::Object(_) => None,
                }));
                released.push(id);
            }
        }
        let mut nodes = self.nodes.write().expect("poisoned naming arena lock");
        for id in released {
            if let Some(slot) = nodes.get_mut(id) {
                *slot = None;
            }
        }
    }

    fn deepest_node(&self, name: &Name) -> Result<Arc<TreeNode>, NamingError> {
        let mut current = self.node(ROOT)?;
        for component in name.components() {
            let next = match current.table().get(component.as_str()) {
                Some(Slot::Node(child)) => Some(*child),
                _ => None,
            };
            match next {
                Some(child) => current = self.node(child)?,
                None => break,
            }
        }
        Ok(current)
    }

    fn check(&self, name: &Name, action: Actions) -> Result<(), NamingError> {
        let candidate = NamingPermission::for_name(name, action);
        if self.checker.permits(&candidate) {
            Ok(())
        } else {
            debug!("permission denied: {candidate}");
            Err(NamingError::PermissionDenied {
                path: name.to_string(),
                actions: action.names(),
            })
        }
    }

    fn descend(&self, node: &TreeNode, name: &Name) -> Result<Step, NamingError> {
        let key = &name[0];
        let table = node.table();
        match table.get(key) {
            None => Err(node.not_bound(key)),
            Some(Slot::Node(child)) => Ok(Step::Node(*child)),
            Some(Slot::Object(binding)) => match &binding.object {
                NamingObject::Reference(reference) if reference.is_federation() => {
                    Err(NamingError::CannotProceed(Box::new(Continuation {
                        resolved: binding.object.clone(),
                        remaining: name.suffix(1),
                    })))
                }
                NamingObject::Reference(_) | NamingObject::Link(_) => {
                    Ok(Step::Partial(binding.object.clone()))
                }
                NamingObject::Value(_) | NamingObject::Context(_) => Err(NamingError::NotContext(
                    format!("{} is not a context", node.prefix.concat(&name.prefix(1))),
                )),
            },
        }
    }

    fn descend_context(&self, node: &TreeNode, name: &Name) -> Result<NodeId, NamingError> {
        match self.descend(node, name)? {
            Step::Node(child) => Ok(child),
            Step::Partial(_) => Err(NamingError::NotContext(format!(
                "{} is not a context",
                node.prefix.concat(&name.prefix(1))
            ))),
        }
    }

    fn fire_event(
        &self,
        node: &TreeNode,
        full_name: Name,
        old_binding: Option<Binding>,
        new_binding: Option<Binding>,
        kind: EventKind,
        change_info: &str,
    ) {
        let Some(event_mgr) = self.event_mgr.as_ref() else {
            trace!("skipping event dispatch for {full_name}: no event manager");
            return;
        };
        let event = NamingEvent {
            kind,
            full_name,
            new_binding,
            old_binding,
            change_info: change_info.to_owned(),
            source: node.prefix.clone(),
        };
        if let Some(listeners) = node.listeners() {
            event_mgr.fire_event(EventDelivery {
                event: event.clone(),
                listeners,
                scopes: ALL_SCOPES,
            });
        }
        let mut parent = node.parent;
        while let Some(id) = parent {
            let Ok(ancestor) = self.node(id) else {
                break;
            };
            if let Some(listeners) = ancestor.listeners() {
                event_mgr.fire_event(EventDelivery {
                    event: event.clone(),
                    listeners,
                    scopes: SUBTREE_ONLY,
                });
            }
            parent = ancestor.parent;
        }
    }

    fn leading_key<'a>(name: &'a Name, operation: &str) -> Result<&'a str, NamingError> {
        match name.get(0) {
            None => Err(NamingError::InvalidName(format!(
                "cannot {operation} an empty name"
            ))),
            Some("") => Err(NamingError::InvalidName(format!(
                "cannot {operation} a name with an empty component: {name}"
            ))),
            Some(key) => Ok(key),
        }
    }

    fn bind_at(
        &self,
        id: NodeId,
        name: &Name,
        object: NamingObject,
        class_name: &str,
    ) -> Result<(), NamingError> {
        let node = self.node(id)?;
        let key = Self::leading_key(name, "bind")?;
        if name.len() > 1 {
            let child = self.descend_context(&node, name)?;
            return self.bind_at(child, &name.suffix(1), object, class_name);
        }
        let full_name = node.prefix.concat(name);
        let mut table = node.table();
        if table.contains_key(key) {
            return Err(NamingError::NameAlreadyBound(full_name.to_string()));
        }
        self.check(&full_name, Actions::BIND)?;
        let binding = Binding::new(key, class_name, object);
        table.insert(key.to_owned(), Slot::Object(binding.clone()));
        drop(table);
        trace!("bind {full_name} ({class_name})");
        self.fire_event(&node, full_name, None, Some(binding), EventKind::ObjectAdded, "bind");
        Ok(())
    }

    fn rebind_at(
        &self,
        id: NodeId,
        name: &Name,
        object: NamingObject,
        class_name: &str,
    ) -> Result<(), NamingError> {
        let node = self.node(id)?;
        let key = Self::leading_key(name, "rebind")?;
        if name.len() > 1 {
            let child = self.descend_context(&node, name)?;
            return self.rebind_at(child, &name.suffix(1), object, class_name);
        }
        let full_name = node.prefix.concat(name);
        let mut table = node.table();
        self.check(&full_name, Actions::REBIND)?;
        let binding = Binding::new(key, class_name, object);
        let old_binding = match table.insert(key.to_owned(), Slot::Object(binding.clone())) {
            None => None,
            Some(Slot::Object(old)) => Some(old),
            Some(Slot::Node(child)) => {
                self.release_subtree(child);
                Some(node.context_binding(key))
            }
        };
        drop(table);
        let kind = if old_binding.is_some() {
            EventKind::ObjectChanged
        } else {
            EventKind::ObjectAdded
        };
        trace!("rebind {full_name} ({class_name})");
        self.fire_event(&node, full_name, old_binding, Some(binding), kind, "rebind");
        Ok(())
    }

    fn unbind_at(&self, id: NodeId, name: &Name) -> Result<(), NamingError> {
        let node = self.node(id)?;
        let key = Self::leading_key(name, "unbind")?;
        if name.len() > 1 {
            let child = self.descend_context(&node, name)?;
            return self.unbind_at(child, &name.suffix(1));
        }
        let full_name = node.prefix.concat(name);
        let mut table = node.table();
        let subcontext = match table.get(key) {
            None => return Err(node.not_bound(key)),
            Some(Slot::Node(child)) => Some(*child),
            Some(Slot::Object(_)) => None,
        };
        self.check(&full_name, Actions::UNBIND)?;
        if let Some(child) = subcontext {
            if !self.node(child)?.table().is_empty() {
                return Err(NamingError::ContextNotEmpty(full_name.to_string()));
            }
        }
        let old_binding = match table.remove(key) {
            Some(Slot::Object(old)) => old,
            _ => node.context_binding(key),
        };
        drop(table);
        if let Some(child) = subcontext {
            self.release_subtree(child);
        }
        trace!("unbind {full_name}");
        self.fire_event(
            &node,
            full_name,
            Some(old_binding),
            None,
            EventKind::ObjectRemoved,
            "unbind",
        );
        Ok(())
    }

    fn lookup_at(&self, id: NodeId, name: &Name) -> Result<LookupResult, NamingError> {
        let node = self.node(id)?;
        if name.is_empty() || (name.len() == 1 && name[0].is_empty()) {
            self.check(&node.prefix, Actions::LOOKUP)?;
            return Ok(LookupResult::Object(NamingObject::Context(ContextRef::new(
                node.prefix.clone(),
            ))));
        }
        if name.len() > 1 {
            return match self.descend(&node, name)? {
                Step::Node(child) => self.lookup_at(child, &name.suffix(1)),
                Step::Partial(resolved) => Ok(LookupResult::Resolve(ResolveResult {
                    resolved,
                    remaining: name.suffix(1),
                })),
            };
        }
        let full_name = node.prefix.concat(name);
        self.check(&full_name, Actions::LOOKUP)?;
        let key = &name[0];
        let table = node.table();
        match table.get(key) {
            None => Err(node.not_bound(key)),
            Some(Slot::Node(_)) => Ok(LookupResult::Object(NamingObject::Context(
                ContextRef::new(full_name),
            ))),
            Some(Slot::Object(binding)) => Ok(LookupResult::Object(binding.object.clone())),
        }
    }

    fn list_at(&self, id: NodeId, name: &Name) -> Result<Vec<NameClassPair>, NamingError> {
        let node = self.node(id)?;
        if !name.is_empty() {
            let child = self.descend_context(&node, name)?;
            return self.list_at(child, &name.suffix(1));
        }
        self.check(&node.prefix, Actions::LIST)?;
        let mut entries: Vec<NameClassPair> = node
            .table()
            .iter()
            .map(|(key, slot)| NameClassPair {
                name: key.clone(),
                class_name: match slot {
                    Slot::Object(binding) => binding.class_name.clone(),
                    Slot::Node(_) => CONTEXT_CLASS_NAME.to_owned(),
                },
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn list_bindings_at(&self, id: NodeId, name: &Name) -> Result<Vec<Binding>, NamingError> {
        let node = self.node(id)?;
        if !name.is_empty() {
            let child = self.descend_context(&node, name)?;
            return self.list_bindings_at(child, &name.suffix(1));
        }
        self.check(&node.prefix, Actions::LIST_BINDINGS)?;
        let mut bindings: Vec<Binding> = node
            .table()
            .iter()
            .map(|(key, slot)| match slot {
                Slot::Object(binding) => binding.clone(),
                Slot::Node(_) => node.context_binding(key),
            })
            .collect();
        bindings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(bindings)
    }

    fn create_subcontext_at(&self, id: NodeId, name: &Name) -> Result<ContextRef, NamingError> {
        let node = self.node(id)?;
        let key = Self::leading_key(name, "create a subcontext for")?;
        if name.len() > 1 {
            let child = self.descend_context(&node, name)?;
            return self.create_subcontext_at(child, &name.suffix(1));
        }
        let full_name = node.prefix.concat(name);
        let mut table = node.table();
        if table.contains_key(key) {
            return Err(NamingError::NameAlreadyBound(full_name.to_string()));
        }
        self.check(&full_name, Actions::CREATE_SUBCONTEXT)?;
        let child = self.allocate(TreeNode::new(full_name.clone(), Some(id)));
        table.insert(key.to_owned(), Slot::Node(child));
        drop(table);
        let binding = node.context_binding(key);
        trace!("create subcontext {full_name} as node #{child}");
        self.fire_event(
            &node,
            full_name.clone(),
            None,
            Some(binding),
            EventKind::ObjectAdded,
            "createSubcontext",
        );
        Ok(ContextRef::new(full_name))
    }
}

impl Naming for NamingTree {
    fn bind(&self, name: &Name, object: NamingObject, class_name: &str) -> Result<(), NamingError> {
        self.bind_at(ROOT, name, object, class_name)
    }

    fn rebind(
        &self,
        name: &Name,
        object: NamingObject,
        class_name: &str,
    ) -> Result<(), NamingError> {
        self.rebind_at(ROOT, name, object, class_name)
    }

    fn unbind(&self, name: &Name) -> Result<(), NamingError> {
        self.unbind_at(ROOT, name)
    }

    fn lookup(&self, name: &Name) -> Result<LookupResult, NamingError> {
        self.lookup_at(ROOT, name)
    }

    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, NamingError> {
        self.list_at(ROOT, name)
    }

    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding>, NamingError> {
        self.list_bindings_at(ROOT, name)
    }

    fn create_subcontext(&self, name: &Name) -> Result<ContextRef, NamingError> {
        self.create_subcontext_at(ROOT, name)
    }

    fn instance_id(&self) -> u64 {
        self.instance
    }

    fn as_tree(&self) -> Option<&NamingTree> {
        Some(self)
    }
}
