// CLASSIFICATION: COMMUNITY
// Filename: tree_operations.rs v0.1
// Author: Lukas Bower
// Date Modified: 2025-10-18

use naming_door::binding::{LookupResult, CONTEXT_CLASS_NAME, FEDERATION_ADDR_TYPE, VALUE_CLASS_NAME};
use naming_door::{Name, Naming, NamingError, NamingObject, NamingTree, Reference};
use serde_json::json;
use serial_test::serial;

fn name(text: &str) -> Name {
    Name::parse(text).unwrap()
}

fn init() -> NamingTree {
    let _ = env_logger::builder().is_test(true).try_init();
    NamingTree::builder().without_events().build()
}

fn value_at(tree: &NamingTree, text: &str) -> serde_json::Value {
    match tree.lookup(&name(text)).unwrap() {
        LookupResult::Object(NamingObject::Value(value)) => (*value.get(false).unwrap()).clone(),
        other => panic!("expected a value at {text}, got {other:?}"),
    }
}

#[test]
#[serial]
fn nested_bind_and_lookup() {
    let tree = init();
    tree.create_subcontext(&name("a")).unwrap();
    let b = tree.create_subcontext(&name("a/b")).unwrap();
    assert_eq!(b.prefix.to_string(), "a/b");
    tree.bind(&name("a/b/c"), NamingObject::value("leaf"), VALUE_CLASS_NAME)
        .unwrap();
    assert_eq!(value_at(&tree, "a/b/c"), json!("leaf"));

    match tree.lookup(&name("a/b")).unwrap() {
        LookupResult::Object(NamingObject::Context(context)) => {
            assert_eq!(context.prefix, name("a/b"));
        }
        other => panic!("expected a context handle, got {other:?}"),
    }
    match tree.lookup(&Name::empty()).unwrap() {
        LookupResult::Object(NamingObject::Context(context)) => assert!(context.prefix.is_empty()),
        other => panic!("expected the root handle, got {other:?}"),
    }
}

#[test]
#[serial]
fn bind_rejects_empty_and_duplicate_names() {
    let tree = init();
    match tree.bind(&Name::empty(), NamingObject::value(1), VALUE_CLASS_NAME) {
        Err(NamingError::InvalidName(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    match tree.bind(&name("/"), NamingObject::value(1), VALUE_CLASS_NAME) {
        Err(NamingError::InvalidName(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    tree.bind(&name("x"), NamingObject::value(1), VALUE_CLASS_NAME)
        .unwrap();
    match tree.bind(&name("x"), NamingObject::value(2), VALUE_CLASS_NAME) {
        Err(NamingError::NameAlreadyBound(bound)) => assert_eq!(bound, "x"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(value_at(&tree, "x"), json!(1));
}

#[test]
#[serial]
fn traversal_through_a_value_is_not_a_context() {
    let tree = init();
    tree.bind(&name("v"), NamingObject::value(3), VALUE_CLASS_NAME)
        .unwrap();
    match tree.bind(&name("v/w"), NamingObject::value(4), VALUE_CLASS_NAME) {
        Err(NamingError::NotContext(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    match tree.list(&name("v")) {
        Err(NamingError::NotContext(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
#[serial]
fn missing_names_report_the_context() {
    let tree = init();
    tree.create_subcontext(&name("a")).unwrap();
    tree.create_subcontext(&name("a/b")).unwrap();
    match tree.lookup(&name("a/b/d")) {
        Err(error @ NamingError::NameNotFound(_)) => {
            assert_eq!(error.to_string(), "d not bound in a/b");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    match tree.unbind(&name("missing")) {
        Err(error @ NamingError::NameNotFound(_)) => assert_eq!(error.to_string(), "missing not bound"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
#[serial]
fn rebind_replaces_values_and_subcontexts() {
    let tree = init();
    tree.rebind(&name("k"), NamingObject::value(1), VALUE_CLASS_NAME)
        .unwrap();
    tree.rebind(&name("k"), NamingObject::value(2), VALUE_CLASS_NAME)
        .unwrap();
    assert_eq!(value_at(&tree, "k"), json!(2));

    tree.create_subcontext(&name("sub")).unwrap();
    tree.create_subcontext(&name("sub/inner")).unwrap();
    assert_eq!(tree.node_count(), 3);
    tree.rebind(&name("sub"), NamingObject::value("flat"), VALUE_CLASS_NAME)
        .unwrap();
    assert_eq!(tree.node_count(), 1);
    assert_eq!(value_at(&tree, "sub"), json!("flat"));
}

#[test]
#[serial]
fn unbind_refuses_non_empty_subcontexts() {
    let tree = init();
    tree.create_subcontext(&name("dir")).unwrap();
    tree.bind(&name("dir/f"), NamingObject::value(true), VALUE_CLASS_NAME)
        .unwrap();
    match tree.unbind(&name("dir")) {
        Err(NamingError::ContextNotEmpty(path)) => assert_eq!(path, "dir"),
        other => panic!("unexpected result: {other:?}"),
    }
    tree.unbind(&name("dir/f")).unwrap();
    tree.unbind(&name("dir")).unwrap();
    assert!(tree.list(&Name::empty()).unwrap().is_empty());
}

#[test]
#[serial]
fn list_and_list_bindings_hide_nodes() {
    let tree = init();
    tree.create_subcontext(&name("ctx")).unwrap();
    tree.bind(&name("val"), NamingObject::value(7), VALUE_CLASS_NAME)
        .unwrap();

    let listed = tree.list(&Name::empty()).unwrap();
    let pairs: Vec<(&str, &str)> = listed
        .iter()
        .map(|pair| (pair.name.as_str(), pair.class_name.as_str()))
        .collect();
    assert_eq!(pairs, vec![("ctx", CONTEXT_CLASS_NAME), ("val", VALUE_CLASS_NAME)]);

    let bindings = tree.list_bindings(&Name::empty()).unwrap();
    assert_eq!(bindings.len(), 2);
    match &bindings[0].object {
        NamingObject::Context(context) => assert_eq!(context.prefix, name("ctx")),
        other => panic!("expected a context handle, got {other:?}"),
    }
}

#[test]
#[serial]
fn federation_reference_yields_a_continuation() {
    let tree = init();
    let foreign = Reference::new("naming.Context")
        .with_factory("remote-root")
        .with_addr(FEDERATION_ADDR_TYPE, "nd://other:1099");
    tree.bind(&name("fed"), foreign.clone().into(), "naming.Context")
        .unwrap();

    for result in [
        tree.lookup(&name("fed/x/y")).map(|_| ()),
        tree.bind(&name("fed/x"), NamingObject::value(1), VALUE_CLASS_NAME),
        tree.unbind(&name("fed/x")),
        tree.list(&name("fed/x")).map(|_| ()),
    ] {
        match result {
            Err(NamingError::CannotProceed(continuation)) => {
                assert_eq!(continuation.resolved, NamingObject::Reference(foreign.clone()));
                assert!(continuation.remaining.get(0) == Some("x"));
            }
            other => panic!("expected a continuation, got {other:?}"),
        }
    }
}

#[test]
#[serial]
fn links_are_not_followed_by_the_tree() {
    let tree = init();
    tree.bind(&name("alias"), NamingObject::link("./target"), "naming.LinkRef")
        .unwrap();
    match tree.lookup(&name("alias")).unwrap() {
        LookupResult::Object(NamingObject::Link(link)) => assert_eq!(link.link_name(), "./target"),
        other => panic!("expected the raw link, got {other:?}"),
    }
    match tree.lookup(&name("alias/rest")).unwrap() {
        LookupResult::Resolve(partial) => assert_eq!(partial.remaining, name("rest")),
        other => panic!("expected a partial resolution, got {other:?}"),
    }
}

#[test]
#[serial]
fn instances_have_distinct_ids() {
    let first = init();
    let second = init();
    assert_ne!(first.instance_id(), second.instance_id());
}
