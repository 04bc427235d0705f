//! Per-request data handed to script engines.

use crate::config::{PluginConfig, ResourceConfig};
use crate::http::{lowercase_keys, HttpMethod, LazyBody, MockRequest};
use crate::store::{RequestStores, STORES_BINDING};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Everything known about a request once a resource matched, before any
/// script runs. Listeners receive it in `before_building_runtime_context`.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub request_id: u64,
    pub plugin: &'a PluginConfig,
    pub resource: &'a ResourceConfig,
    pub request: &'a MockRequest,
    pub path_params: &'a HashMap<String, String>,
}

/// A value contributed by a listener and exposed to scripts as a global.
#[derive(Clone)]
pub enum ScriptBinding {
    Json(Value),
    Stores(Arc<RequestStores>),
}

impl fmt::Debug for ScriptBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptBinding::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ScriptBinding::Stores(s) => f
                .debug_tuple("Stores")
                .field(&s.request_store_name())
                .finish(),
        }
    }
}

/// Named bindings in insertion order. Inserting an existing name replaces it.
#[derive(Debug, Clone, Default)]
pub struct AdditionalBindings {
    entries: Vec<(String, ScriptBinding)>,
}

impl AdditionalBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, binding: ScriptBinding) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = binding,
            None => self.entries.push((name, binding)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ScriptBinding> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScriptBinding)> {
        self.entries.iter().map(|(n, b)| (n.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The request's store view, if the store listener contributed one.
    pub fn stores(&self) -> Option<&Arc<RequestStores>> {
        match self.get(STORES_BINDING) {
            Some(ScriptBinding::Stores(stores)) => Some(stores),
            _ => None,
        }
    }
}

/// Read-only snapshot of one request as scripts see it.
///
/// Header, query and path parameter keys are lower-cased so scripts can look
/// them up case-insensitively. The body stays lazy until a script reads it.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub request_id: u64,
    pub method: HttpMethod,
    pub uri: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body: LazyBody,
    pub bindings: AdditionalBindings,
}

impl RuntimeContext {
    pub fn build(context: &ExecutionContext<'_>, bindings: AdditionalBindings) -> Self {
        let request = context.request;
        Self {
            request_id: context.request_id,
            method: request.method,
            uri: request.uri.clone(),
            path: request.path.clone(),
            headers: lowercase_keys(&request.headers),
            // Path params keep the case declared in the path template.
            path_params: context.path_params.clone(),
            query_params: lowercase_keys(&request.query),
            body: request.body.clone(),
            bindings,
        }
    }

    pub fn stores(&self) -> Option<&Arc<RequestStores>> {
        self.bindings.stores()
    }

    /// Request fields without the body, in the shape scripts see under
    /// `context.request`.
    pub fn request_metadata(&self) -> Value {
        json!({
            "uri": self.uri,
            "path": self.path,
            "method": self.method.as_str(),
            "headers": self.headers,
            "pathParams": self.path_params,
            "queryParams": self.query_params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreService;

    #[test]
    fn test_runtime_context_lowercases_request_keys() {
        let plugin = PluginConfig::default();
        let resource = ResourceConfig::default();
        let request = MockRequest::new(HttpMethod::Post, "/pets/7?Verbose=true")
            .with_header("X-Api-Key", "secret")
            .with_body("{\"name\":\"Rex\"}");
        let mut path_params = HashMap::new();
        path_params.insert("petId".to_string(), "7".to_string());

        let exec = ExecutionContext {
            request_id: 42,
            plugin: &plugin,
            resource: &resource,
            request: &request,
            path_params: &path_params,
        };
        let runtime = RuntimeContext::build(&exec, AdditionalBindings::new());

        assert_eq!(runtime.request_id, 42);
        assert_eq!(runtime.headers.get("x-api-key"), Some(&"secret".to_string()));
        assert_eq!(runtime.path_params.get("petId"), Some(&"7".to_string()));
        assert!(runtime.path_params.get("petid").is_none());
        assert_eq!(runtime.query_params.get("verbose"), Some(&"true".to_string()));
        assert_eq!(runtime.body.as_text(), "{\"name\":\"Rex\"}");

        let meta = runtime.request_metadata();
        assert_eq!(meta["method"], "POST");
        assert_eq!(meta["path"], "/pets/7");
        assert_eq!(meta["pathParams"]["petId"], "7");
        assert!(meta.get("body").is_none());
    }

    #[test]
    fn test_bindings_replace_and_keep_order() {
        let mut bindings = AdditionalBindings::new();
        bindings.insert("a", ScriptBinding::Json(json!(1)));
        bindings.insert("b", ScriptBinding::Json(json!(2)));
        bindings.insert("a", ScriptBinding::Json(json!(3)));

        let names: Vec<&str> = bindings.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(matches!(bindings.get("a"), Some(ScriptBinding::Json(v)) if *v == json!(3)));
        assert!(bindings.stores().is_none());
    }

    #[test]
    fn test_stores_binding_lookup() {
        let service = StoreService::in_memory();
        let mut bindings = AdditionalBindings::new();
        bindings.insert(
            STORES_BINDING,
            ScriptBinding::Stores(Arc::new(service.request_scope(5))),
        );
        assert_eq!(bindings.stores().unwrap().request_store_name(), "request_5");
    }
}
