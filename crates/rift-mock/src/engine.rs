//! The resolution pipeline: match a request, run the resource's script if it
//! has one, and reconcile the resulting behaviour.
//!
//! The engine is built once from frozen configuration and shared across
//! request handlers; `resolve` takes `&self` and only touches synchronised
//! state (script caches, stores, the request id counter).

use crate::behaviour::{BehaviourType, MutableResponseBehaviour, ReadResponseBehaviour, ResponseBehaviour};
use crate::config::{EngineConfig, PluginConfig, ResourceConfig};
use crate::error::{ConfigError, ResolveError, ScriptError, StartupError};
use crate::hooks::{LifecycleHooks, RouteSummary};
use crate::http::MockRequest;
use crate::matcher::{MatchedResource, ResourceMatcher};
use crate::metrics;
use crate::script::{
    script_path, AdditionalBindings, ExecutionContext, RuntimeContext, ScriptExecutorRegistry,
};
use crate::store::{StoreLifecycleListener, StoreService};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A request that matched a resource, with its final behaviour.
#[derive(Debug, Clone)]
pub struct ResolvedResponse {
    pub request_id: u64,
    pub behaviour: ResponseBehaviour,
    /// Directory `behaviour.response_file()` resolves against
    pub base_dir: PathBuf,
    pub resource: String,
    pub path_params: HashMap<String, String>,
    pub is_root: bool,
    pub scripted: bool,
}

impl ResolvedResponse {
    pub fn behaviour_type(&self) -> BehaviourType {
        self.behaviour.behaviour_type()
    }
}

/// Outcome of resolving one request.
#[derive(Debug, Clone)]
pub enum Resolution {
    Matched(ResolvedResponse),
    /// No resource and no root resource applied
    NotFound,
    /// A lifecycle listener refused the request
    Rejected,
}

impl Resolution {
    fn outcome(&self) -> &'static str {
        match self {
            Resolution::Matched(r) if r.behaviour_type() == BehaviourType::ImmediateResponse => {
                "immediate"
            }
            Resolution::Matched(_) => "default",
            Resolution::NotFound => "not_found",
            Resolution::Rejected => "rejected",
        }
    }
}

fn script_error_type(e: &ScriptError) -> &'static str {
    match e {
        ScriptError::Load { .. } => "load",
        ScriptError::Compile { .. } => "compile",
        ScriptError::Execution { .. } => "runtime",
        ScriptError::Behaviour { .. } => "behaviour",
        ScriptError::MissingScript { .. }
        | ScriptError::UnknownEngine(_)
        | ScriptError::EngineDisabled { .. } => "config",
    }
}

pub struct ResolutionEngine {
    config: EngineConfig,
    matchers: Vec<ResourceMatcher>,
    scripts: ScriptExecutorRegistry,
    hooks: LifecycleHooks,
    next_request_id: AtomicU64,
}

impl ResolutionEngine {
    /// Compile every plugin and check that each script has an engine.
    ///
    /// Fires `after_routes_configured` once the routes are in place.
    pub fn new(
        config: EngineConfig,
        plugins: Vec<PluginConfig>,
        hooks: LifecycleHooks,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let scripts = ScriptExecutorRegistry::from_config(&config)?;

        let mut matchers = Vec::with_capacity(plugins.len());
        for plugin in &plugins {
            plugin.validate()?;
            let matcher = ResourceMatcher::new(plugin.clone())?;
            for resource in matcher
                .resources()
                .iter()
                .map(|c| c.resource())
                .chain(plugin.root_resource().as_ref())
            {
                if let Ok(path) = script_path(plugin, resource) {
                    scripts
                        .select(&path)
                        .map_err(|e| ConfigError::NoScriptEngine {
                            resource: resource.describe(),
                            reason: e.to_string(),
                        })?;
                }
            }
            matchers.push(matcher);
        }

        let routes: Vec<RouteSummary> = matchers
            .iter()
            .flat_map(ResourceMatcher::route_summaries)
            .collect();
        info!(
            "Configured {} route(s) across {} plugin(s)",
            routes.len(),
            matchers.len()
        );
        hooks.after_routes_configured(&config, &plugins, &routes);

        Ok(Self {
            config,
            matchers,
            scripts,
            hooks,
            next_request_id: AtomicU64::new(0),
        })
    }

    /// Engine with the store listener registered ahead of `hooks`, backed by
    /// the configured store driver.
    pub fn with_stores(
        config: EngineConfig,
        plugins: Vec<PluginConfig>,
        hooks: LifecycleHooks,
    ) -> Result<Self, StartupError> {
        let stores = StoreService::from_config(&config.store)?;
        let mut all = LifecycleHooks::new()
            .with_listener(Arc::new(StoreLifecycleListener::new(stores)));
        all.extend(hooks);
        Ok(Self::new(config, plugins, all)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    pub fn scripts(&self) -> &ScriptExecutorRegistry {
        &self.scripts
    }

    /// Forget the compiled form of a script so the next request recompiles it.
    pub fn invalidate_script(&self, path: &Path) {
        self.scripts.invalidate(path);
    }

    fn find<'a>(&'a self, request: &MockRequest) -> Option<(&'a PluginConfig, MatchedResource<'a>)> {
        self.matchers
            .iter()
            .find_map(|m| m.find_declared(request).map(|found| (m.plugin(), found)))
            .or_else(|| {
                self.matchers
                    .iter()
                    .find_map(|m| m.find_root(request).map(|found| (m.plugin(), found)))
            })
    }

    pub fn resolve(&self, request: &MockRequest) -> Result<Resolution, ResolveError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let method = request.method.as_str();

        let result = self.resolve_inner(request_id, request);
        match &result {
            Ok(resolution) => {
                debug!(
                    "Request {} {} {} resolved: {}",
                    request_id,
                    method,
                    request.path,
                    resolution.outcome()
                );
                metrics::record_resolution(method, resolution.outcome());
            }
            Err(e) => {
                warn!("Request {} {} {} failed: {}", request_id, method, request.path, e);
                metrics::record_resolution(method, "error");
            }
        }
        result
    }

    fn resolve_inner(&self, request_id: u64, request: &MockRequest) -> Result<Resolution, ResolveError> {
        if !self.hooks.is_request_permitted(request) {
            return Ok(Resolution::Rejected);
        }

        let Some((plugin, matched)) = self.find(request) else {
            return Ok(Resolution::NotFound);
        };
        let resource = matched.resource;

        let scripted = resource.response.has_script();
        let mut behaviour = if scripted {
            self.run_script(request_id, plugin, &matched, request)?
        } else {
            ResponseBehaviour::from_response_config(&resource.response)
        };

        reconcile(&mut behaviour, resource)?;

        Ok(Resolution::Matched(ResolvedResponse {
            request_id,
            behaviour,
            base_dir: plugin.resource_dir(resource).to_path_buf(),
            resource: resource.describe(),
            path_params: matched.path_params,
            is_root: matched.is_root,
            scripted,
        }))
    }

    fn run_script(
        &self,
        request_id: u64,
        plugin: &PluginConfig,
        matched: &MatchedResource<'_>,
        request: &MockRequest,
    ) -> Result<ResponseBehaviour, ScriptError> {
        let resource = matched.resource;
        let path = script_path(plugin, resource)?;
        let executor = self.scripts.select(&path)?;
        let engine = executor.engine_name();

        let execution = ExecutionContext {
            request_id,
            plugin,
            resource,
            request,
            path_params: &matched.path_params,
        };
        let mut bindings = AdditionalBindings::new();
        self.hooks
            .before_building_runtime_context(&mut bindings, &execution);
        let runtime = RuntimeContext::build(&execution, bindings);

        let start = Instant::now();
        let result = executor.execute_script(plugin, resource, &runtime);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::record_script_execution(engine, elapsed_ms, result.is_ok());
        if let Some(cache) = executor.cache_metrics() {
            metrics::update_script_cache(engine, &cache);
        }

        let mut behaviour = result.inspect_err(|e| {
            metrics::record_script_error(engine, script_error_type(e));
        })?;
        debug!(
            "Script {} ({}) finished in {:.2}ms",
            path.display(),
            engine,
            elapsed_ms
        );

        self.hooks
            .after_successful_script_execution(&runtime.bindings, &mut behaviour);
        Ok(behaviour)
    }
}

/// An unconfigured behaviour becomes DEFAULT; DEFAULT behaviours take
/// whatever body-related settings the script left untouched from config.
fn reconcile(behaviour: &mut ResponseBehaviour, resource: &ResourceConfig) -> Result<(), ResolveError> {
    if !behaviour.is_configured() {
        behaviour.using_default_behaviour()?;
    }
    if behaviour.behaviour_type() == BehaviourType::DefaultBehaviour {
        behaviour.apply_config_defaults(&resource.response);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseConfig;
    use crate::hooks::EngineLifecycleListener;
    use crate::http::HttpMethod;
    use indexmap::IndexMap;
    use std::sync::atomic::AtomicUsize;

    fn static_resource(path: &str, data: &str) -> ResourceConfig {
        ResourceConfig::new(HttpMethod::Get, path).with_response(ResponseConfig {
            static_data: Some(data.to_string()),
            ..Default::default()
        })
    }

    fn engine(plugins: Vec<PluginConfig>, hooks: LifecycleHooks) -> ResolutionEngine {
        ResolutionEngine::new(EngineConfig::default(), plugins, hooks).unwrap()
    }

    fn matched(resolution: Resolution) -> ResolvedResponse {
        match resolution {
            Resolution::Matched(r) => r,
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn test_static_resource_reconciles_to_default() {
        let mut headers = IndexMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let mut resource = static_resource("/pets", r#"[{"id":1}]"#);
        resource.response.headers = headers;
        let engine = engine(
            vec![PluginConfig {
                resources: vec![resource],
                ..Default::default()
            }],
            LifecycleHooks::new(),
        );

        let resolved = matched(
            engine
                .resolve(&MockRequest::new(HttpMethod::Get, "/pets"))
                .unwrap(),
        );
        assert_eq!(resolved.behaviour.status_code(), 200);
        assert_eq!(resolved.behaviour_type(), BehaviourType::DefaultBehaviour);
        assert!(resolved.behaviour.is_configured());
        assert_eq!(resolved.behaviour.response_data(), Some(r#"[{"id":1}]"#));
        assert_eq!(
            resolved.behaviour.response_header("content-type"),
            Some("application/json")
        );
        assert!(!resolved.scripted);
    }

    #[test]
    fn test_not_found_without_root() {
        let engine = engine(
            vec![PluginConfig {
                resources: vec![static_resource("/pets", "[]")],
                ..Default::default()
            }],
            LifecycleHooks::new(),
        );
        assert!(matches!(
            engine.resolve(&MockRequest::new(HttpMethod::Get, "/owners")),
            Ok(Resolution::NotFound)
        ));
    }

    #[test]
    fn test_declared_resources_of_all_plugins_before_roots() {
        let first = PluginConfig {
            plugin: Some("first".to_string()),
            response: Some(ResponseConfig {
                static_data: Some("first-root".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let second = PluginConfig {
            plugin: Some("second".to_string()),
            resources: vec![static_resource("/pets", "second-pets")],
            ..Default::default()
        };
        let engine = engine(vec![first, second], LifecycleHooks::new());

        let pets = matched(engine.resolve(&MockRequest::new(HttpMethod::Get, "/pets")).unwrap());
        assert_eq!(pets.behaviour.response_data(), Some("second-pets"));

        let other = matched(engine.resolve(&MockRequest::new(HttpMethod::Get, "/x")).unwrap());
        assert!(other.is_root);
        assert_eq!(other.behaviour.response_data(), Some("first-root"));
    }

    struct DenyAll;

    impl EngineLifecycleListener for DenyAll {
        fn name(&self) -> &str {
            "deny-all"
        }

        fn is_request_permitted(&self, _request: &MockRequest) -> bool {
            false
        }
    }

    #[test]
    fn test_rejected_by_listener() {
        let engine = engine(
            vec![PluginConfig {
                resources: vec![static_resource("/pets", "[]")],
                ..Default::default()
            }],
            LifecycleHooks::new().with_listener(Arc::new(DenyAll)),
        );
        assert!(matches!(
            engine.resolve(&MockRequest::new(HttpMethod::Get, "/pets")),
            Ok(Resolution::Rejected)
        ));
    }

    #[derive(Default)]
    struct RouteCounter {
        routes: AtomicUsize,
        calls: AtomicUsize,
    }

    impl EngineLifecycleListener for RouteCounter {
        fn name(&self) -> &str {
            "route-counter"
        }

        fn after_routes_configured(
            &self,
            _config: &EngineConfig,
            _plugins: &[PluginConfig],
            routes: &[RouteSummary],
        ) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.routes.store(routes.len(), Ordering::SeqCst);
        }
    }

    #[test]
    fn test_after_routes_configured_fires_once() {
        let counter = Arc::new(RouteCounter::default());
        let _engine = engine(
            vec![PluginConfig {
                response: Some(ResponseConfig::default()),
                resources: vec![static_resource("/a", ""), static_resource("/b", "")],
                ..Default::default()
            }],
            LifecycleHooks::new().with_listener(counter.clone()),
        );
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(counter.routes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_request_ids_are_unique_and_increasing() {
        let engine = engine(
            vec![PluginConfig {
                resources: vec![static_resource("/pets", "[]")],
                ..Default::default()
            }],
            LifecycleHooks::new(),
        );
        let request = MockRequest::new(HttpMethod::Get, "/pets");
        let first = matched(engine.resolve(&request).unwrap()).request_id;
        let second = matched(engine.resolve(&request).unwrap()).request_id;
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn test_missing_script_fails_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = PluginConfig {
            resources: vec![ResourceConfig::new(HttpMethod::Get, "/s").with_response(
                ResponseConfig {
                    script_file: Some("absent.rhai".to_string()),
                    ..Default::default()
                },
            )],
            ..Default::default()
        }
        .with_parent_dir(dir.path());
        let err = ResolutionEngine::new(EngineConfig::default(), vec![plugin], LifecycleHooks::new())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::ScriptNotFound { .. }));
    }

    fn scripted_resource(path: &str, script: &str) -> ResourceConfig {
        ResourceConfig::new(HttpMethod::Get, path).with_response(ResponseConfig {
            script_file: Some(script.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_path_params_keep_declared_case_in_scripts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("owner.rhai"),
            r#"respond().withHeader("X-Owner", context.request.pathParams.ownerId);"#,
        )
        .unwrap();
        let mut resources = vec![scripted_resource("/rhai/owners/{ownerId}", "owner.rhai")];

        #[cfg(feature = "javascript")]
        {
            std::fs::write(
                dir.path().join("owner.js"),
                r#"respond().withHeader("X-Owner", context.request.pathParams.ownerId);"#,
            )
            .unwrap();
            resources.push(scripted_resource("/js/owners/{ownerId}", "owner.js"));
        }

        let plugin = PluginConfig {
            resources,
            ..Default::default()
        }
        .with_parent_dir(dir.path());
        let engine = engine(vec![plugin], LifecycleHooks::new());

        let mut prefixes = vec!["rhai"];
        if cfg!(feature = "javascript") {
            prefixes.push("js");
        }
        for prefix in prefixes {
            let resolved = matched(
                engine
                    .resolve(&MockRequest::new(HttpMethod::Get, &format!("/{prefix}/owners/o-17")))
                    .unwrap(),
            );
            assert_eq!(
                resolved.path_params.get("ownerId").map(String::as_str),
                Some("o-17")
            );
            assert_eq!(resolved.behaviour.response_header("X-Owner"), Some("o-17"), "{prefix}");
        }
    }

    #[test]
    fn test_reconcile_keeps_immediate() {
        let resource = static_resource("/x", "ignored");
        let mut behaviour = ResponseBehaviour::new();
        behaviour.immediately().unwrap();
        reconcile(&mut behaviour, &resource).unwrap();
        assert_eq!(behaviour.behaviour_type(), BehaviourType::ImmediateResponse);
        assert!(behaviour.response_data().is_none());
    }
}
