//! Module tree load/unload behavior through the public API.

use std::time::Duration;

use module_runtime::tree::{LoaderSettings, ModuleTree, RepeatLoadPolicy};
use module_runtime::unit::{UnitKind, UnitSpec, UnitState};
use module_runtime::{CancellationToken, ConfigStore, RuntimeError};
use serde_json::json;
use std::sync::Arc;

mod common;
use common::{failing_service, failing_unit_of, service, slow_service, unit_of, Journal, Recording};

#[tokio::test]
async fn test_equal_priorities_share_a_wave() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    let delay = Duration::from_millis(25);
    for (name, priority) in [("a", 10), ("b", 10), ("c", 20)] {
        tree.register(tree.root(), UnitSpec::new(name).priority(priority), slow_service(name, &journal, delay))
            .unwrap();
    }

    let report = tree.load(tree.root()).await.unwrap();

    // {a, b} overlap; c waits for both
    assert!(journal.position("start:a") < journal.position("load:b"));
    assert!(journal.position("start:b") < journal.position("load:a"));
    assert!(journal.position("load:a") < journal.position("start:c"));
    assert!(journal.position("load:b") < journal.position("start:c"));
    assert_eq!(
        serde_json::to_value(&report).unwrap(),
        json!([{"type": "services", "status": {"a": true, "b": true, "c": true}}])
    );
}

#[tokio::test]
async fn test_nested_levels_follow_their_parent() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    let http = tree
        .register(tree.root(), UnitSpec::new("http").priority(20), service("http", &journal))
        .unwrap();
    tree.register(http, UnitSpec::new("auth"), service("auth", &journal))
        .unwrap();
    tree.register(tree.root(), UnitSpec::new("db").priority(10), service("db", &journal))
        .unwrap();

    let report = tree.load(tree.root()).await.unwrap();
    assert_eq!(journal.events(), vec!["start:db", "load:db", "start:http", "load:http", "start:auth", "load:auth"]);
    assert_eq!(
        serde_json::to_value(&report).unwrap(),
        json!([
            {"type": "services", "status": {"db": true, "http": true}},
            {"type": "services", "status": {"auth": true}}
        ])
    );
    assert_eq!(tree.find("app/http/auth").and_then(|id| tree.state(id)), Some(UnitState::Loaded));
}

#[tokio::test]
async fn test_required_failure_unloads_the_first_wave() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    let db = tree
        .register(tree.root(), UnitSpec::new("db").priority(10), service("db", &journal))
        .unwrap();
    let queue = tree
        .register(tree.root(), UnitSpec::new("queue").priority(10), service("queue", &journal))
        .unwrap();
    tree.register(
        tree.root(),
        UnitSpec::new("api").priority(20).required(),
        failing_service("api", &journal),
    )
    .unwrap();
    let late = tree
        .register(tree.root(), UnitSpec::new("late").priority(30), service("late", &journal))
        .unwrap();

    let err = tree.load(tree.root()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::RequiredUnitFailed { ref unit, .. } if unit == "app/api"));

    assert_eq!(tree.state(db), Some(UnitState::Unloaded));
    assert_eq!(tree.state(queue), Some(UnitState::Unloaded));
    assert_eq!(tree.state(late), Some(UnitState::Unloaded));
    assert!(journal.contains("unload:db"));
    assert!(journal.contains("unload:queue"));
    assert!(!journal.contains("start:late"));
}

#[tokio::test]
async fn test_optional_failure_does_not_block_later_waves() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    tree.register(tree.root(), UnitSpec::new("metrics").priority(10), failing_service("metrics", &journal))
        .unwrap();
    tree.register(tree.root(), UnitSpec::new("api").priority(20), service("api", &journal))
        .unwrap();

    let report = tree.load(tree.root()).await.unwrap();
    assert_eq!(report.status_of("metrics"), Some(false));
    assert_eq!(report.status_of("api"), Some(true));
    assert_eq!(report.failures(), vec!["metrics"]);
    assert_eq!(tree.state(tree.root()), Some(UnitState::Loaded));
}

#[tokio::test]
async fn test_mutual_dependency_rejected_at_registration() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    tree.register(tree.root(), UnitSpec::new("a").depends_on("b"), service("a", &journal))
        .unwrap();

    let err = tree
        .register(tree.root(), UnitSpec::new("b").depends_on("a"), service("b", &journal))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::CircularDependency { .. }));
    assert!(tree.find("app/b").is_none());
}

#[tokio::test]
async fn test_dependency_bindings() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    tree.register(tree.root(), UnitSpec::new("db").priority(10), service("db", &journal))
        .unwrap();
    let api = tree
        .register(tree.root(), UnitSpec::new("api").priority(20).depends_on("db"), service("api", &journal))
        .unwrap();
    let orphan = tree
        .register(tree.root(), UnitSpec::new("orphan").priority(20).depends_on("ghost"), service("orphan", &journal))
        .unwrap();

    assert!(matches!(
        tree.resolve(api, "db"),
        Err(RuntimeError::DependencyNotLoaded { state: UnitState::Unloaded, .. })
    ));

    let report = tree.load(tree.root()).await.unwrap();
    assert_eq!(report.status_of("orphan"), Some(false));
    assert_eq!(tree.state(orphan), Some(UnitState::Failed));

    let db = tree.resolve(api, "db").unwrap();
    assert_eq!(db.path(), "app/db");
    assert_eq!(db.downcast::<Recording>().map(|r| r.name), Some("db"));
    assert!(matches!(tree.resolve(api, "ghost"), Err(RuntimeError::DependencyMissing { .. })));
}

#[tokio::test]
async fn test_repeat_load_is_idempotent() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    tree.register(tree.root(), UnitSpec::new("db"), service("db", &journal))
        .unwrap();

    let first = tree.load(tree.root()).await.unwrap();
    let second = tree.load(tree.root()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(journal.events().iter().filter(|e| *e == "load:db").count(), 1);
}

#[tokio::test]
async fn test_repeat_load_rejected_under_strict_policy() {
    let settings = LoaderSettings {
        repeat_load: RepeatLoadPolicy::Reject,
        ..Default::default()
    };
    let tree = ModuleTree::with_store("app", Arc::new(ConfigStore::new()), settings);
    let journal = Journal::default();
    tree.register(tree.root(), UnitSpec::new("db"), service("db", &journal))
        .unwrap();

    tree.load(tree.root()).await.unwrap();
    assert!(matches!(
        tree.load(tree.root()).await,
        Err(RuntimeError::LifecycleViolation { .. })
    ));
}

#[tokio::test]
async fn test_unload_requires_loaded() {
    let tree = ModuleTree::new("app");
    assert!(matches!(
        tree.unload(tree.root()).await,
        Err(RuntimeError::LifecycleViolation { .. })
    ));
}

#[tokio::test]
async fn test_overlapping_operations_rejected() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    let db = tree
        .register(
            tree.root(),
            UnitSpec::new("db"),
            slow_service("db", &journal, Duration::from_millis(50)),
        )
        .unwrap();

    let (loaded, overlapping) = tokio::join!(tree.load(tree.root()), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        tree.unload(db).await
    });

    assert!(loaded.is_ok());
    assert!(matches!(overlapping, Err(RuntimeError::LifecycleViolation { .. })));
    assert_eq!(tree.state(db), Some(UnitState::Loaded));
}

#[tokio::test]
async fn test_cancel_discards_in_flight_wave() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    let first = tree
        .register(
            tree.root(),
            UnitSpec::new("first").priority(10),
            slow_service("first", &journal, Duration::from_millis(40)),
        )
        .unwrap();
    tree.register(tree.root(), UnitSpec::new("second").priority(20), service("second", &journal))
        .unwrap();

    let cancel = CancellationToken::new();
    let (result, ()) = tokio::join!(tree.load_with(tree.root(), &cancel), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
    });

    assert!(matches!(result, Err(RuntimeError::Cancelled { .. })));
    // the in-flight member finished but its result was discarded
    assert!(journal.contains("load:first"));
    assert!(!journal.contains("start:second"));
    assert_eq!(tree.state(first), Some(UnitState::Unloaded));
    assert_eq!(tree.state(tree.root()), Some(UnitState::Unloaded));
}

#[tokio::test]
async fn test_failed_unit_needs_reset() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    let flaky = tree
        .register(tree.root(), UnitSpec::new("flaky"), failing_service("flaky", &journal))
        .unwrap();

    tree.load(tree.root()).await.unwrap();
    assert_eq!(tree.state(flaky), Some(UnitState::Failed));
    assert!(matches!(tree.load(flaky).await, Err(RuntimeError::LifecycleViolation { .. })));

    tree.reset(flaky).unwrap();
    assert_eq!(tree.state(flaky), Some(UnitState::Unloaded));
}

#[tokio::test]
async fn test_unload_report_mirrors_load() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    tree.register(tree.root(), UnitSpec::new("db").priority(10), service("db", &journal))
        .unwrap();
    tree.register(tree.root(), UnitSpec::new("api").priority(20), service("api", &journal))
        .unwrap();

    let loaded = tree.load(tree.root()).await.unwrap();
    let unloaded = tree.unload(tree.root()).await.unwrap();
    assert_eq!(loaded, unloaded);
    assert!(journal.position("unload:api") < journal.position("unload:db"));
}

#[tokio::test]
async fn test_unload_report_labels_every_kind() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    tree.register(tree.root(), UnitSpec::new("db").priority(10), service("db", &journal))
        .unwrap();
    tree.register(tree.root(), UnitSpec::new("auth").priority(20), unit_of(UnitKind::Middleware, "auth", &journal))
        .unwrap();
    tree.register(tree.root(), UnitSpec::new("clock").priority(20), unit_of(UnitKind::Utility, "clock", &journal))
        .unwrap();
    let http = tree
        .register(tree.root(), UnitSpec::new("http").priority(30), unit_of(UnitKind::Component, "http", &journal))
        .unwrap();
    tree.register(http, UnitSpec::new("router"), unit_of(UnitKind::Middleware, "router", &journal))
        .unwrap();

    let loaded = tree.load(tree.root()).await.unwrap();
    let expected = json!([
        {"type": "services", "status": {"db": true}},
        {"type": "middlewares", "status": {"auth": true}},
        {"type": "utilities", "status": {"clock": true}},
        {"type": "components", "status": {"http": true}},
        {"type": "middlewares", "status": {"router": true}}
    ]);
    assert_eq!(serde_json::to_value(&loaded).unwrap(), expected);

    let unloaded = tree.unload(tree.root()).await.unwrap();
    assert_eq!(unloaded, loaded);
    assert!(journal.position("unload:router") < journal.position("unload:http"));
    assert!(journal.position("unload:http") < journal.position("unload:auth"));
    assert!(journal.position("unload:auth") < journal.position("unload:db"));
}

#[tokio::test]
async fn test_nested_failure_keeps_its_kind_label() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    let http = tree
        .register(tree.root(), UnitSpec::new("http"), unit_of(UnitKind::Component, "http", &journal))
        .unwrap();
    let auth = tree
        .register(http, UnitSpec::new("auth").priority(10), failing_unit_of(UnitKind::Middleware, "auth", &journal))
        .unwrap();
    tree.register(http, UnitSpec::new("cache").priority(20), unit_of(UnitKind::Utility, "cache", &journal))
        .unwrap();

    let report = tree.load(tree.root()).await.unwrap();
    assert_eq!(
        serde_json::to_value(&report).unwrap(),
        json!([
            {"type": "components", "status": {"http": true}},
            {"type": "middlewares", "status": {"auth": false}},
            {"type": "utilities", "status": {"cache": true}}
        ])
    );
    assert_eq!(tree.state(auth), Some(UnitState::Failed));

    // the failed middleware is reset quietly and left out of the teardown
    let unloaded = tree.unload(tree.root()).await.unwrap();
    assert_eq!(
        serde_json::to_value(&unloaded).unwrap(),
        json!([
            {"type": "components", "status": {"http": true}},
            {"type": "utilities", "status": {"cache": true}}
        ])
    );
    assert_eq!(tree.state(auth), Some(UnitState::Unloaded));
}

#[tokio::test]
async fn test_reports_after_rollback_keep_kind_labels() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    let auth = tree
        .register(tree.root(), UnitSpec::new("auth").priority(10), unit_of(UnitKind::Middleware, "auth", &journal))
        .unwrap();
    tree.register(tree.root(), UnitSpec::new("clock").priority(10), unit_of(UnitKind::Utility, "clock", &journal))
        .unwrap();
    let broken = tree
        .register(
            tree.root(),
            UnitSpec::new("broken").priority(20).required(),
            failing_unit_of(UnitKind::Component, "broken", &journal),
        )
        .unwrap();

    let err = tree.load(tree.root()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::RequiredUnitFailed { .. }));
    assert!(journal.contains("unload:auth"));
    assert!(journal.contains("unload:clock"));
    assert_eq!(tree.state(auth), Some(UnitState::Unloaded));
    assert_eq!(tree.status(auth).and_then(|s| s.kind), Some(UnitKind::Middleware));

    tree.reset(tree.root()).unwrap();
    tree.remove(broken).unwrap();

    let loaded = tree.load(tree.root()).await.unwrap();
    let expected = json!([
        {"type": "middlewares", "status": {"auth": true}},
        {"type": "utilities", "status": {"clock": true}}
    ]);
    assert_eq!(serde_json::to_value(&loaded).unwrap(), expected);
    let unloaded = tree.unload(tree.root()).await.unwrap();
    assert_eq!(serde_json::to_value(&unloaded).unwrap(), expected);
}

#[tokio::test]
async fn test_rejected_registration_keeps_repeat_load_idempotent() {
    let tree = ModuleTree::new("app");
    let journal = Journal::default();
    tree.register(tree.root(), UnitSpec::new("db"), service("db", &journal))
        .unwrap();
    tree.register(tree.root(), UnitSpec::new("a").depends_on("b"), service("a", &journal))
        .unwrap();
    let first = tree.load(tree.root()).await.unwrap();

    assert!(matches!(
        tree.register(tree.root(), UnitSpec::new("b").depends_on("a"), service("b", &journal)),
        Err(RuntimeError::CircularDependency { .. })
    ));
    let second = tree.load(tree.root()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(journal.events().iter().filter(|e| *e == "load:db").count(), 1);
}
