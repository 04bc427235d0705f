//! Lifecycle hooks around request resolution.
//!
//! Listeners are registered on a [`LifecycleHooks`] value that is handed to
//! the [`crate::ResolutionEngine`] at construction. Every hook runs
//! synchronously on the resolving thread, in registration order.

use crate::behaviour::ResponseBehaviour;
use crate::config::{EngineConfig, PluginConfig};
use crate::http::{HttpMethod, MockRequest};
use crate::script::{AdditionalBindings, ExecutionContext};
use std::fmt;
use std::sync::Arc;

/// One configured route, as reported to `after_routes_configured`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSummary {
    pub plugin: Option<String>,
    pub method: HttpMethod,
    /// `None` for a root resource without a path
    pub path: Option<String>,
    pub script_file: Option<String>,
    pub is_root: bool,
}

/// Extension points of the resolution pipeline. Every method has a no-op
/// default so listeners only implement what they need.
pub trait EngineLifecycleListener: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called once after all plugin routes have been compiled.
    fn after_routes_configured(
        &self,
        _config: &EngineConfig,
        _plugins: &[PluginConfig],
        _routes: &[RouteSummary],
    ) {
    }

    /// Checked before matching. Any listener returning `false` rejects the request.
    fn is_request_permitted(&self, _request: &MockRequest) -> bool {
        true
    }

    /// Called before the runtime context for a script is built. Listeners may
    /// add bindings that scripts will see as globals.
    fn before_building_runtime_context(
        &self,
        _bindings: &mut AdditionalBindings,
        _context: &ExecutionContext<'_>,
    ) {
    }

    /// Called after a script completed without error.
    fn after_successful_script_execution(
        &self,
        _bindings: &AdditionalBindings,
        _behaviour: &mut ResponseBehaviour,
    ) {
    }
}

/// Ordered listener registry.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    listeners: Vec<Arc<dyn EngineLifecycleListener>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn EngineLifecycleListener>) {
        tracing::debug!("Registered lifecycle listener: {}", listener.name());
        self.listeners.push(listener);
    }

    pub fn with_listener(mut self, listener: Arc<dyn EngineLifecycleListener>) -> Self {
        self.register(listener);
        self
    }

    /// Append every listener of `other`, keeping its order.
    pub fn extend(&mut self, other: LifecycleHooks) {
        for listener in other.listeners {
            self.register(listener);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Invoke `f` on every listener in registration order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&dyn EngineLifecycleListener),
    {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }

    /// True when every listener satisfies `predicate`; true for an empty registry.
    pub fn all_match<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&dyn EngineLifecycleListener) -> bool,
    {
        self.listeners.iter().all(|l| predicate(l.as_ref()))
    }

    pub fn after_routes_configured(
        &self,
        config: &EngineConfig,
        plugins: &[PluginConfig],
        routes: &[RouteSummary],
    ) {
        self.for_each(|l| l.after_routes_configured(config, plugins, routes));
    }

    pub fn is_request_permitted(&self, request: &MockRequest) -> bool {
        self.all_match(|l| {
            let permitted = l.is_request_permitted(request);
            if !permitted {
                tracing::debug!(
                    "Request {} {} rejected by listener {}",
                    request.method,
                    request.path,
                    l.name()
                );
            }
            permitted
        })
    }

    pub fn before_building_runtime_context(
        &self,
        bindings: &mut AdditionalBindings,
        context: &ExecutionContext<'_>,
    ) {
        self.for_each(|l| l.before_building_runtime_context(bindings, context));
    }

    pub fn after_successful_script_execution(
        &self,
        bindings: &AdditionalBindings,
        behaviour: &mut ResponseBehaviour,
    ) {
        self.for_each(|l| l.after_successful_script_execution(bindings, behaviour));
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.listeners.iter().map(|l| l.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviour::{MutableResponseBehaviour, ReadResponseBehaviour};
    use crate::config::ResourceConfig;
    use crate::script::ScriptBinding;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        permit: bool,
    }

    impl EngineLifecycleListener for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn after_routes_configured(
            &self,
            _config: &EngineConfig,
            _plugins: &[PluginConfig],
            routes: &[RouteSummary],
        ) {
            self.log
                .lock()
                .push(format!("{}:routes:{}", self.name, routes.len()));
        }

        fn is_request_permitted(&self, _request: &MockRequest) -> bool {
            self.log.lock().push(format!("{}:permit", self.name));
            self.permit
        }

        fn before_building_runtime_context(
            &self,
            bindings: &mut AdditionalBindings,
            _context: &ExecutionContext<'_>,
        ) {
            bindings.insert(self.name, ScriptBinding::Json(serde_json::json!(self.name)));
            self.log.lock().push(format!("{}:before", self.name));
        }

        fn after_successful_script_execution(
            &self,
            _bindings: &AdditionalBindings,
            behaviour: &mut ResponseBehaviour,
        ) {
            behaviour.with_header("X-Seen-By", Some(self.name));
            self.log.lock().push(format!("{}:after", self.name));
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, permit: bool) -> Arc<Recorder> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            permit,
        })
    }

    #[test]
    fn test_empty_registry_is_vacuously_permitting() {
        let hooks = LifecycleHooks::new();
        assert!(hooks.is_empty());
        assert!(hooks.is_request_permitted(&MockRequest::new(HttpMethod::Get, "/")));
        assert!(hooks.all_match(|_| false));
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = LifecycleHooks::new()
            .with_listener(recorder("first", &log, true))
            .with_listener(recorder("second", &log, true));

        let plugin = PluginConfig::default();
        let resource = ResourceConfig::default();
        let request = MockRequest::new(HttpMethod::Get, "/");
        let path_params = HashMap::new();
        let context = ExecutionContext {
            request_id: 1,
            plugin: &plugin,
            resource: &resource,
            request: &request,
            path_params: &path_params,
        };

        hooks.after_routes_configured(&EngineConfig::default(), &[], &[]);
        let mut bindings = AdditionalBindings::new();
        hooks.before_building_runtime_context(&mut bindings, &context);
        let mut behaviour = ResponseBehaviour::new();
        hooks.after_successful_script_execution(&bindings, &mut behaviour);

        assert_eq!(
            *log.lock(),
            vec![
                "first:routes:0",
                "second:routes:0",
                "first:before",
                "second:before",
                "first:after",
                "second:after",
            ]
        );
        assert_eq!(bindings.len(), 2);
        assert_eq!(behaviour.response_header("X-Seen-By"), Some("second"));
    }

    #[test]
    fn test_rejecting_listener_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = LifecycleHooks::new()
            .with_listener(recorder("deny", &log, false))
            .with_listener(recorder("never", &log, true));

        assert!(!hooks.is_request_permitted(&MockRequest::new(HttpMethod::Get, "/")));
        assert_eq!(*log.lock(), vec!["deny:permit"]);
    }

    #[test]
    fn test_debug_lists_listener_names() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = LifecycleHooks::new().with_listener(recorder("stores", &log, true));
        assert_eq!(format!("{hooks:?}"), r#"["stores"]"#);
    }
}
