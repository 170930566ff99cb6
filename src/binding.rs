// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Stored objects, references, links, and bindings held by tree nodes.
// Author: Lukas Bower

//! Objects bound in the naming tree and the shapes returned by enumeration.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NamingError;
use crate::name::Name;

/// Address type that marks a reference as the root of a foreign namespace.
pub const FEDERATION_ADDR_TYPE: &str = "nns";
/// Type tag recorded for subcontext bindings.
pub const CONTEXT_CLASS_NAME: &str = "naming.Context";
/// Type tag recorded for plain values.
pub const VALUE_CLASS_NAME: &str = "naming.Value";
/// Type tag recorded for links.
pub const LINK_CLASS_NAME: &str = "naming.LinkRef";

/// Serialized value paired with the in-process original.
///
/// The serialized form is what crosses the wire. The in-process copy is only
/// present on the side that created the value and is never serialized.
#[derive(Clone, Serialize, Deserialize)]
pub struct MarshalledValue {
    serialized: String,
    #[serde(skip)]
    local: Option<Arc<Value>>,
}

impl MarshalledValue {
    /// Wrap a JSON value.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            serialized: value.to_string(),
            local: Some(Arc::new(value)),
        }
    }

    /// Wrap any serializable value.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, NamingError> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// Produce the value.
    ///
    /// With `call_by_value` set, or when no in-process copy exists, a fresh
    /// copy is deserialized. Otherwise the shared in-process value is returned.
    pub fn get(&self, call_by_value: bool) -> Result<Arc<Value>, NamingError> {
        match &self.local {
            Some(local) if !call_by_value => Ok(Arc::clone(local)),
            _ => Ok(Arc::new(serde_json::from_str(&self.serialized)?)),
        }
    }

    /// Serialized JSON text.
    #[must_use]
    pub fn serialized(&self) -> &str {
        &self.serialized
    }
}

impl PartialEq for MarshalledValue {
    fn eq(&self, other: &Self) -> bool {
        self.serialized == other.serialized
    }
}

impl fmt::Debug for MarshalledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarshalledValue")
            .field("serialized", &self.serialized)
            .field("local", &self.local.is_some())
            .finish()
    }
}

/// Typed address inside a [`Reference`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefAddr {
    /// Address type, e.g. `nns` or `url`.
    pub addr_type: String,
    /// Address content.
    pub content: String,
}

/// Symbolic descriptor from which an object factory rebuilds a live object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Type tag of the object the reference describes.
    pub class_name: String,
    /// Name of the registered factory able to rebuild the object.
    pub factory: Option<String>,
    /// Where the factory may be found.
    pub factory_location: Option<String>,
    /// Address data passed to the factory.
    pub addrs: Vec<RefAddr>,
}

impl Reference {
    /// Reference with no factory and no addresses.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            factory: None,
            factory_location: None,
            addrs: Vec::new(),
        }
    }

    /// Name the factory that rebuilds this reference.
    #[must_use]
    pub fn with_factory(mut self, factory: impl Into<String>) -> Self {
        self.factory = Some(factory.into());
        self
    }

    /// Append an address.
    #[must_use]
    pub fn with_addr(mut self, addr_type: impl Into<String>, content: impl Into<String>) -> Self {
        self.addrs.push(RefAddr {
            addr_type: addr_type.into(),
            content: content.into(),
        });
        self
    }

    /// First address of the given type.
    #[must_use]
    pub fn addr(&self, addr_type: &str) -> Option<&RefAddr> {
        self.addrs.iter().find(|addr| addr.addr_type == addr_type)
    }

    /// Whether this reference roots a foreign namespace.
    #[must_use]
    pub fn is_federation(&self) -> bool {
        self.addr(FEDERATION_ADDR_TYPE).is_some()
    }
}

/// A binding whose value is another name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    link_name: String,
}

impl LinkRef {
    /// Link to `link_name`; a `./` prefix makes it relative to the current context.
    pub fn new(link_name: impl Into<String>) -> Self {
        Self {
            link_name: link_name.into(),
        }
    }

    /// Target text.
    #[must_use]
    pub fn link_name(&self) -> &str {
        &self.link_name
    }

    /// Target relative to the resolving context, if the link is relative.
    #[must_use]
    pub fn relative_target(&self) -> Option<&str> {
        self.link_name.strip_prefix("./")
    }
}

/// Handle to a context of the tree that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRef {
    /// Absolute name of the context.
    pub prefix: Name,
}

impl ContextRef {
    /// Handle for the context at `prefix`.
    #[must_use]
    pub fn new(prefix: Name) -> Self {
        Self { prefix }
    }
}

/// Object held by a binding or produced by a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingObject {
    /// Plain value.
    Value(MarshalledValue),
    /// Reference rebuilt by an object factory.
    Reference(Reference),
    /// Link to another name.
    Link(LinkRef),
    /// Context handle; tree nodes are never exposed directly.
    Context(ContextRef),
}

impl NamingObject {
    /// Wrap a plain value.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(MarshalledValue::new(value.into()))
    }

    /// Link to `target`.
    pub fn link(target: impl Into<String>) -> Self {
        Self::Link(LinkRef::new(target))
    }

    /// Type tag used when the object is bound.
    #[must_use]
    pub fn class_name(&self) -> &str {
        match self {
            NamingObject::Value(_) => VALUE_CLASS_NAME,
            NamingObject::Reference(reference) => &reference.class_name,
            NamingObject::Link(_) => LINK_CLASS_NAME,
            NamingObject::Context(_) => CONTEXT_CLASS_NAME,
        }
    }
}

impl From<Reference> for NamingObject {
    fn from(reference: Reference) -> Self {
        Self::Reference(reference)
    }
}

impl From<LinkRef> for NamingObject {
    fn from(link: LinkRef) -> Self {
        Self::Link(link)
    }
}

/// Name, type tag, and object stored under one key of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Key relative to the owning node.
    pub name: String,
    /// Type tag.
    pub class_name: String,
    /// Bound object.
    pub object: NamingObject,
}

impl Binding {
    /// Construct a binding.
    pub fn new(name: impl Into<String>, class_name: impl Into<String>, object: NamingObject) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            object,
        }
    }
}

/// Name and type tag returned by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameClassPair {
    /// Key relative to the listed context.
    pub name: String,
    /// Type tag.
    pub class_name: String,
}

/// Partially resolved lookup: the object reached and the name left over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveResult {
    /// Object at which the tree stopped.
    pub resolved: NamingObject,
    /// Components still to resolve against `resolved`.
    pub remaining: Name,
}

/// Raw result of a tree lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupResult {
    /// Terminal object.
    Object(NamingObject),
    /// Lookup stopped at a reference before the name was exhausted.
    Resolve(ResolveResult),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn marshalled_value_shares_or_copies() {
        let value = MarshalledValue::new(json!({"port": 1099}));
        let shared_a = value.get(false).expect("shared");
        let shared_b = value.get(false).expect("shared");
        assert!(Arc::ptr_eq(&shared_a, &shared_b));

        let copy = value.get(true).expect("copy");
        assert!(!Arc::ptr_eq(&shared_a, &copy));
        assert_eq!(*copy, json!({"port": 1099}));
    }

    #[test]
    fn wire_copy_loses_in_process_value() {
        let object = NamingObject::value("Hello world");
        let text = serde_json::to_string(&object).expect("encode");
        let decoded: NamingObject = serde_json::from_str(&text).expect("decode");
        match decoded {
            NamingObject::Value(value) => {
                assert_eq!(*value.get(false).expect("value"), json!("Hello world"));
            }
            other => panic!("unexpected object: {other:?}"),
        }
    }

    #[test]
    fn federation_is_marked_by_nns_address() {
        let plain = Reference::new("svc").with_addr("url", "nd://x:1");
        assert!(!plain.is_federation());
        let foreign = plain.with_addr(FEDERATION_ADDR_TYPE, "nd://y:1");
        assert!(foreign.is_federation());
    }

    #[test]
    fn relative_links_strip_dot_slash() {
        assert_eq!(LinkRef::new("./x/y").relative_target(), Some("x/y"));
        assert_eq!(LinkRef::new("a/b").relative_target(), None);
    }
}
