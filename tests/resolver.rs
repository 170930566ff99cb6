// CLASSIFICATION: COMMUNITY
// Filename: resolver.rs v0.1
// Author: Lukas Bower
// Date Modified: 2025-10-18

use std::collections::VecDeque;
use std::error::Error as _;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use naming_door::binding::{
    Binding, ContextRef, LookupResult, NameClassPair, FEDERATION_ADDR_TYPE,
};
use naming_door::config::{
    CALL_BY_VALUE, DISABLE_DISCOVERY, MAX_RETRIES, PROVIDER_URL, USE_RELATIVE_NAME,
};
use naming_door::registry::StubLoader;
use naming_door::{
    Environment, HostPort, Name, Naming, NamingContext, NamingError, NamingObject,
    NamingRegistry, NamingTree, Reference, Resolved,
};
use serde_json::json;
use serial_test::serial;

#[derive(Debug, Clone, Copy)]
enum Failure {
    Stale,
    Refused,
}

/// Handle that fails scripted calls before delegating to a shared tree.
struct Scripted {
    tree: Arc<NamingTree>,
    failures: Mutex<VecDeque<Failure>>,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn gate(&self) -> Result<(), NamingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().unwrap().pop_front() {
            None => Ok(()),
            Some(Failure::Stale) => Err(NamingError::StaleHandle("instance recycled".into())),
            Some(Failure::Refused) => Err(NamingError::ConnectRefused {
                target: "fake:1099".into(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        }
    }
}

impl Naming for Scripted {
    fn bind(&self, name: &Name, object: NamingObject, class_name: &str) -> Result<(), NamingError> {
        self.gate()?;
        self.tree.bind(name, object, class_name)
    }

    fn rebind(
        &self,
        name: &Name,
        object: NamingObject,
        class_name: &str,
    ) -> Result<(), NamingError> {
        self.gate()?;
        self.tree.rebind(name, object, class_name)
    }

    fn unbind(&self, name: &Name) -> Result<(), NamingError> {
        self.gate()?;
        self.tree.unbind(name)
    }

    fn lookup(&self, name: &Name) -> Result<LookupResult, NamingError> {
        self.gate()?;
        self.tree.lookup(name)
    }

    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, NamingError> {
        self.gate()?;
        self.tree.list(name)
    }

    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding>, NamingError> {
        self.gate()?;
        self.tree.list_bindings(name)
    }

    fn create_subcontext(&self, name: &Name) -> Result<ContextRef, NamingError> {
        self.gate()?;
        self.tree.create_subcontext(name)
    }

    fn instance_id(&self) -> u64 {
        self.tree.instance_id()
    }
}

/// Loader handing out one scripted handle per load.
struct ScriptedLoader {
    tree: Arc<NamingTree>,
    scripts: Mutex<VecDeque<Vec<Failure>>>,
    loads: AtomicUsize,
    calls: Arc<AtomicUsize>,
    refuse_from: usize,
}

impl ScriptedLoader {
    fn refusing_from(scripts: Vec<Vec<Failure>>, refuse_from: usize) -> Arc<Self> {
        Arc::new(Self {
            tree: Arc::new(NamingTree::new()),
            scripts: Mutex::new(scripts.into()),
            loads: AtomicUsize::new(0),
            calls: Arc::new(AtomicUsize::new(0)),
            refuse_from,
        })
    }

    fn new(scripts: Vec<Vec<Failure>>) -> Arc<Self> {
        Self::refusing_from(scripts, usize::MAX)
    }

    fn unreachable() -> Arc<Self> {
        Self::refusing_from(Vec::new(), 0)
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StubLoader for ScriptedLoader {
    fn load(&self, endpoint: &HostPort, _env: &Environment) -> Result<Arc<dyn Naming>, NamingError> {
        let index = self.loads.fetch_add(1, Ordering::SeqCst);
        if index >= self.refuse_from {
            return Err(NamingError::communication(
                format!("failed to connect to server {endpoint}"),
                None,
            ));
        }
        let failures = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Arc::new(Scripted {
            tree: Arc::clone(&self.tree),
            failures: Mutex::new(failures.into()),
            calls: Arc::clone(&self.calls),
        }))
    }
}

fn remote_context(loader: &Arc<ScriptedLoader>, extra: &[(&str, &str)]) -> NamingContext {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = Arc::new(NamingRegistry::with_stub_loader(loader.clone()));
    let mut env = Environment::new()
        .with(PROVIDER_URL, "nd://fake:1099")
        .with(DISABLE_DISCOVERY, "true");
    for (key, value) in extra {
        env.set(*key, *value);
    }
    NamingContext::initial(env, registry)
}

fn local_root() -> NamingContext {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = Arc::new(NamingRegistry::new());
    registry.set_local_server(Some(Arc::new(NamingTree::new())));
    NamingContext::initial(Environment::new().with(DISABLE_DISCOVERY, "true"), registry)
}

fn value(resolved: &Resolved) -> serde_json::Value {
    (**resolved.as_value().expect("a value")).clone()
}

#[test]
#[serial]
fn stale_handle_is_refreshed_once() {
    let loader = ScriptedLoader::new(vec![vec![Failure::Stale], vec![]]);
    let context = remote_context(&loader, &[]);
    context.bind("k", NamingObject::value(5)).unwrap();
    assert_eq!(loader.loads(), 2);
    assert_eq!(loader.calls(), 2);
    assert_eq!(value(&context.lookup("k").unwrap()), json!(5));
    assert_eq!(loader.loads(), 2);
}

#[test]
#[serial]
fn second_stale_handle_is_a_communication_failure() {
    let loader = ScriptedLoader::new(vec![vec![Failure::Stale], vec![Failure::Stale]]);
    let context = remote_context(&loader, &[]);
    match context.lookup("k") {
        Err(error @ NamingError::CommunicationFailure { .. }) => {
            let cause = error.source().expect("cause");
            assert!(cause.to_string().contains("stale"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(loader.loads(), 2);
    assert_eq!(loader.calls(), 2);
    assert!(!context.is_connected());
}

#[test]
#[serial]
fn failed_reconnect_after_stale_handle_keeps_the_connect_error() {
    let loader = ScriptedLoader::refusing_from(vec![vec![Failure::Stale]], 1);
    let context = remote_context(&loader, &[]);
    match context.lookup("k") {
        Err(error @ NamingError::CommunicationFailure { .. }) => {
            assert!(error.to_string().contains("stale"), "{error}");
            let cause = error.source().expect("cause").to_string();
            assert!(cause.contains("nd://fake:1099"), "{cause}");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(loader.loads(), 2);
    assert_eq!(loader.calls(), 1);
    assert!(!context.is_connected());
}

#[test]
#[serial]
fn refused_connections_are_retried_up_to_the_limit() {
    let loader = ScriptedLoader::new(vec![vec![Failure::Refused, Failure::Refused]]);
    let context = remote_context(&loader, &[(MAX_RETRIES, "3")]);
    context.rebind("k", NamingObject::value("ok")).unwrap();
    assert_eq!(loader.calls(), 3);
    assert_eq!(loader.loads(), 1);
}

#[test]
#[serial]
fn exhausted_retries_surface_the_refusal() {
    let loader = ScriptedLoader::new(vec![vec![Failure::Refused, Failure::Refused]]);
    let context = remote_context(&loader, &[(MAX_RETRIES, "2")]);
    match context.list("") {
        Err(error @ NamingError::CommunicationFailure { .. }) => {
            assert!(error.to_string().contains("connection refused by fake:1099"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(loader.calls(), 2);
    assert!(!context.is_connected());
}

#[test]
#[serial]
fn unreachable_urls_report_every_url() {
    let loader = ScriptedLoader::unreachable();
    let context = remote_context(&loader, &[(PROVIDER_URL, "nd://one:1099,two")]);
    match context.lookup("k") {
        Err(error @ NamingError::CommunicationFailure { .. }) => {
            let message = error.to_string();
            assert!(message.contains("nd://one:1099,two"), "{message}");
            assert!(error.source().is_some());
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(loader.loads(), 2);
}

#[test]
#[serial]
fn embedded_server_info_is_used_for_one_call() {
    let loader = ScriptedLoader::new(vec![]);
    let registry = Arc::new(NamingRegistry::with_stub_loader(loader.clone()));
    registry.set_local_server(Some(Arc::new(NamingTree::new())));
    let context = NamingContext::initial(
        Environment::new().with(DISABLE_DISCOVERY, "true"),
        Arc::clone(&registry),
    );
    context
        .bind("nd://fake:1099/remote", NamingObject::value(1))
        .unwrap();
    assert_eq!(loader.loads(), 1);
    assert!(!context.is_connected());
    assert_eq!(registry.cached_servers(), 0);

    match context.lookup("remote") {
        Err(NamingError::NameNotFound(_)) => {}
        other => panic!("local tree should not hold the binding: {other:?}"),
    }
    assert!(context.is_connected());
}

#[test]
#[serial]
fn links_are_dereferenced() {
    let root = local_root();
    root.create_subcontext("a").unwrap();
    root.create_subcontext("a/b").unwrap();
    root.bind("a/b/c", NamingObject::value("target")).unwrap();
    root.bind("absolute", NamingObject::link("a/b/c")).unwrap();
    root.bind("relative", NamingObject::link("./a/b/c")).unwrap();
    root.bind("dir", NamingObject::link("./a/b")).unwrap();
    root.bind("broken", NamingObject::link("a/b/d")).unwrap();

    assert_eq!(value(&root.lookup("absolute").unwrap()), json!("target"));
    assert_eq!(value(&root.lookup("relative").unwrap()), json!("target"));
    assert_eq!(value(&root.lookup("dir/c").unwrap()), json!("target"));
    match root.lookup("broken") {
        Err(error @ NamingError::NameNotFound(_)) => {
            assert_eq!(error.to_string(), "d not bound in a/b");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let raw = root.lookup_link("absolute").unwrap();
    assert_eq!(raw.as_link().map(|link| link.link_name()), Some("a/b/c"));
    let listed = root.list_bindings("").unwrap();
    let broken = listed.iter().find(|binding| binding.name == "broken").unwrap();
    assert!(broken.object.as_link().is_some());
}

#[test]
#[serial]
fn link_cycles_fail_instead_of_recursing() {
    let root = local_root();
    root.bind("loop", NamingObject::link("loop")).unwrap();
    root.bind("ping", NamingObject::link("./pong")).unwrap();
    root.bind("pong", NamingObject::link("ping")).unwrap();
    root.bind("spin", NamingObject::link("./spin")).unwrap();

    for name in ["loop", "ping", "spin/child"] {
        match root.lookup(name) {
            Err(error @ NamingError::NameNotFound(_)) => {
                assert!(error.to_string().contains("link cycle"), "{error}");
            }
            other => panic!("unexpected result for {name}: {other:?}"),
        }
    }
    let raw = root.lookup_link("loop").unwrap();
    assert_eq!(raw.as_link().map(|link| link.link_name()), Some("loop"));
}

#[test]
#[serial]
fn federation_hands_off_to_the_foreign_namespace() {
    let root = local_root();
    let foreign: Arc<dyn Naming> = Arc::new(NamingTree::new());
    let foreign_registry = Arc::new(NamingRegistry::new());
    {
        let foreign = Arc::clone(&foreign);
        root.registry().factories().register(
            "remote-root",
            Arc::new(
                move |_: &Reference, _: &Name, env: &Environment| -> Result<Resolved, NamingError> {
                    Ok(Resolved::Context(NamingContext::new(
                        env.clone(),
                        Name::empty(),
                        Some(Arc::clone(&foreign)),
                        Arc::clone(&foreign_registry),
                    )))
                },
            ),
        );
    }
    let pointer = Reference::new("naming.Context")
        .with_factory("remote-root")
        .with_addr(FEDERATION_ADDR_TYPE, "nd://elsewhere:1099");
    root.bind("fed", pointer.into()).unwrap();

    root.bind("fed/x", NamingObject::value(42)).unwrap();
    root.create_subcontext("fed/sub").unwrap();
    assert_eq!(value(&root.lookup("fed/x").unwrap()), json!(42));

    let names: Vec<String> = root
        .list("fed")
        .unwrap()
        .into_iter()
        .map(|pair| pair.name)
        .collect();
    assert_eq!(names, vec!["sub".to_owned(), "x".to_owned()]);

    match foreign.lookup(&Name::parse("x").unwrap()).unwrap() {
        LookupResult::Object(NamingObject::Value(stored)) => {
            assert_eq!(*stored.get(false).unwrap(), json!(42));
        }
        other => panic!("foreign tree should hold x: {other:?}"),
    }
    let fed = root.lookup("fed").unwrap().into_context().unwrap();
    assert_eq!(value(&fed.lookup("x").unwrap()), json!(42));
}

#[test]
#[serial]
fn missing_factory_names_factory_and_target() {
    let root = local_root();
    let apps = root.create_subcontext("apps").unwrap();
    apps.bind(
        "svc",
        Reference::new("example.Service").with_factory("absent").into(),
    )
    .unwrap();

    match apps.lookup("svc") {
        Err(NamingError::MissingFactory { factory, target }) => {
            assert_eq!(factory, "absent");
            assert_eq!(target, "apps/svc");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    apps.add_to_environment(USE_RELATIVE_NAME, "true");
    match apps.lookup("svc") {
        Err(NamingError::MissingFactory { target, .. }) => assert_eq!(target, "svc"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[derive(Debug)]
struct Pool {
    size: usize,
}

#[test]
#[serial]
fn factories_rebuild_references() {
    let root = local_root();
    root.registry().factories().register(
        "pool",
        Arc::new(
            |reference: &Reference, _: &Name, _: &Environment| -> Result<Resolved, NamingError> {
                let size = reference
                    .addr("size")
                    .and_then(|addr| addr.content.parse().ok())
                    .unwrap_or(1);
                Ok(Resolved::Object(Arc::new(Pool { size })))
            },
        ),
    );
    root.bind(
        "db",
        Reference::new("example.Pool")
            .with_factory("pool")
            .with_addr("size", "8")
            .into(),
    )
    .unwrap();
    root.bind("plain", Reference::new("example.Plain").into())
        .unwrap();

    let pool = root.lookup("db").unwrap().downcast::<Pool>().unwrap();
    assert_eq!(pool.size, 8);
    match root.lookup("plain").unwrap() {
        Resolved::Reference(reference) => assert_eq!(reference.class_name, "example.Plain"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
#[serial]
fn call_by_value_returns_copies() {
    let root = local_root();
    root.bind("shared", NamingObject::value(json!({"port": 1}))).unwrap();

    let first = root.lookup("shared").unwrap();
    let second = root.lookup("shared").unwrap();
    assert!(Arc::ptr_eq(first.as_value().unwrap(), second.as_value().unwrap()));

    root.add_to_environment(CALL_BY_VALUE, "true");
    let copy = root.lookup("shared").unwrap();
    assert!(!Arc::ptr_eq(first.as_value().unwrap(), copy.as_value().unwrap()));
    assert_eq!(value(&copy), json!({"port": 1}));
}

#[test]
#[serial]
fn destroy_subcontext_requires_an_empty_context() {
    let root = local_root();
    root.create_subcontext("tmp").unwrap();
    root.bind("tmp/file", NamingObject::value(0)).unwrap();
    match root.destroy_subcontext("tmp") {
        Err(NamingError::ContextNotEmpty(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    root.unbind("tmp/file").unwrap();
    root.destroy_subcontext("tmp").unwrap();
    match root.lookup("tmp") {
        Err(NamingError::NameNotFound(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
#[serial]
fn rename_moves_objects_but_not_subcontexts() {
    let root = local_root();
    root.bind("old", NamingObject::value("moving")).unwrap();
    root.rename("old", "new").unwrap();
    assert_eq!(value(&root.lookup("new").unwrap()), json!("moving"));
    match root.lookup("old") {
        Err(NamingError::NameNotFound(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    root.create_subcontext("dir").unwrap();
    match root.rename("dir", "moved") {
        Err(NamingError::OperationNotSupported(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    match root.rename("new", "taken") {
        Ok(()) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    root.bind("other", NamingObject::value(1)).unwrap();
    match root.rename("other", "taken") {
        Err(NamingError::NameAlreadyBound(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(value(&root.lookup("other").unwrap()), json!(1));
}
