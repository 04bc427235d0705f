//! Concurrent resolution against one shared engine.

use rift_mock::config::{PluginConfig, ResourceConfig, ResponseConfig};
use rift_mock::store::{Store, StoreLifecycleListener, StoreService};
use rift_mock::{
    EngineConfig, HttpMethod, LifecycleHooks, MockRequest, ReadResponseBehaviour, Resolution,
    ResolutionEngine,
};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

const REQUEST_SCOPED: &str = r#"
let scratch = stores.open("request");
let before = scratch.count();
scratch.save("marker", context.request.pathParams.id);
stores.open("shared").save(context.request.pathParams.id, true);
respond()
    .withHeader("X-Before", before)
    .withHeader("X-Marker", scratch.load("marker"))
    .withHeader("X-After", scratch.count());
"#;

fn setup(service: &StoreService) -> (TempDir, Arc<ResolutionEngine>) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("scoped.rhai"), REQUEST_SCOPED).unwrap();

    let plugin = PluginConfig {
        plugin: Some("scoped".to_string()),
        resources: vec![ResourceConfig::new(HttpMethod::Get, "/items/{id}").with_response(
            ResponseConfig {
                script_file: Some("scoped.rhai".to_string()),
                ..Default::default()
            },
        )],
        ..Default::default()
    }
    .with_parent_dir(dir.path());

    let hooks = LifecycleHooks::new().with_listener(Arc::new(StoreLifecycleListener::new(
        service.clone(),
    )));
    let engine = ResolutionEngine::new(EngineConfig::default(), vec![plugin], hooks).unwrap();
    (dir, Arc::new(engine))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_request_stores_are_isolated_under_concurrency() {
    let service = StoreService::in_memory();
    let (_dir, engine) = setup(&service);

    let mut handles = Vec::new();
    for i in 0..64 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::task::spawn_blocking(move || {
            let request = MockRequest::new(HttpMethod::Get, &format!("/items/{i}"));
            match engine.resolve(&request).unwrap() {
                Resolution::Matched(resolved) => resolved,
                other => panic!("expected a match, got {other:?}"),
            }
        }));
    }

    let mut request_ids = HashSet::new();
    for (i, handle) in handles.into_iter().enumerate() {
        let resolved = handle.await.unwrap();
        let behaviour = &resolved.behaviour;
        assert_eq!(behaviour.response_header("X-Before"), Some("0"));
        assert_eq!(behaviour.response_header("X-After"), Some("1"));
        assert_eq!(behaviour.response_header("X-Marker"), Some(i.to_string().as_str()));
        assert!(request_ids.insert(resolved.request_id));
    }
    assert_eq!(request_ids.len(), 64);

    // Request stores are released with their request; shared stores persist.
    for id in &request_ids {
        assert!(!service.has_store_with_name(&format!("request_{id}"), true));
    }
    let shared = service.get_store_by_name("shared", false).unwrap();
    assert_eq!(shared.count().unwrap(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_script_cache_holds_one_entry_under_contention() {
    let service = StoreService::in_memory();
    let (_dir, engine) = setup(&service);

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || {
                engine
                    .resolve(&MockRequest::new(HttpMethod::Get, &format!("/items/{i}")))
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let metrics = engine
        .scripts()
        .cache_metrics()
        .into_iter()
        .find(|(name, _)| *name == "rhai")
        .map(|(_, m)| m)
        .unwrap();
    assert!(metrics.misses >= 1);
    assert_eq!(metrics.hits + metrics.misses, 32);
    assert_eq!(metrics.size, 1);
    assert_eq!(metrics.evictions, 0);
}
