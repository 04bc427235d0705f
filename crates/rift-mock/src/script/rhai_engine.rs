//! Rhai script engine.
//!
//! Scripts run top to bottom with these globals in scope:
//!
//! - `context.request` with `uri`, `path`, `method`, `headers`, `pathParams`,
//!   `queryParams` and `body` (read lazily)
//! - every additional binding, e.g. `stores`
//!
//! and these functions:
//!
//! - `respond()` returning the fluent response behaviour
//! - `log_info(msg)`, `log_warn(msg)`, `log_debug(msg)`
//!
//! ```rhai
//! if context.request.pathParams.id == "0" {
//!     respond().withStatusCode(404).and().skipDefaultBehaviour();
//! } else {
//!     stores.open("request").save("seen", true);
//!     respond().withHeader("X-Pet", context.request.pathParams.id).usingDefaultBehaviour();
//! }
//! ```

use super::{
    cache_config, read_script, script_path, RuntimeContext, ScriptBinding, ScriptExecutor,
    SharedBehaviour, RHAI_ENGINE,
};
use crate::behaviour::{MutableResponseBehaviour, ResponseBehaviour};
use crate::cache::{BoundedCache, CacheMetrics};
use crate::config::{PluginConfig, ResourceConfig, ScriptCacheConfig, ScriptEngineConfig};
use crate::error::ScriptError;
use crate::http::LazyBody;
use crate::store::{RequestStores, Store};
use rhai::{Dynamic, Engine, EvalAltResult, Map, Scope, AST};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

const SCRIPT_LOG_TARGET: &str = "rift_mock::script";

thread_local! {
    static CURRENT_BEHAVIOUR: RefCell<Option<SharedBehaviour>> = const { RefCell::new(None) };
}

/// Clears the thread-local behaviour when execution ends, including on unwind.
struct CurrentBehaviourGuard;

impl CurrentBehaviourGuard {
    fn install(behaviour: SharedBehaviour) -> Self {
        CURRENT_BEHAVIOUR.with(|b| *b.borrow_mut() = Some(behaviour));
        CurrentBehaviourGuard
    }
}

impl Drop for CurrentBehaviourGuard {
    fn drop(&mut self) {
        CURRENT_BEHAVIOUR.with(|b| *b.borrow_mut() = None);
    }
}

fn runtime_error(e: impl Display) -> Box<EvalAltResult> {
    e.to_string().into()
}

fn to_dynamic(value: &Value) -> RhaiResult<Dynamic> {
    rhai::serde::to_dynamic(value)
}

fn to_json(value: &Dynamic) -> RhaiResult<Value> {
    rhai::serde::from_dynamic::<Value>(value)
}

fn string_map(map: &HashMap<String, String>) -> Map {
    map.iter()
        .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
        .collect()
}

/// `respond()`: the behaviour of the request being resolved on this thread.
fn respond() -> RhaiResult<ScriptResponse> {
    CURRENT_BEHAVIOUR
        .with(|b| b.borrow().clone())
        .map(ScriptResponse)
        .ok_or_else(|| runtime_error("respond() called outside of a script execution"))
}

/// Fluent response API exposed to scripts.
#[derive(Clone)]
struct ScriptResponse(SharedBehaviour);

impl ScriptResponse {
    fn update(&mut self, f: impl FnOnce(&mut ResponseBehaviour)) -> Self {
        self.0.update(f);
        self.clone()
    }

    fn configure(
        &mut self,
        f: impl FnOnce(&mut ResponseBehaviour) -> Result<(), crate::error::BehaviourError>,
    ) -> RhaiResult<Self> {
        self.0.try_update(f).map_err(runtime_error)?;
        Ok(self.clone())
    }

    fn with_status_code(&mut self, code: i64) -> RhaiResult<Self> {
        self.configure(|b| b.try_with_status_code(code).map(|_| ()))
    }

    fn with_file(&mut self, path: &str) -> Self {
        self.update(|b| {
            b.with_file(path);
        })
    }

    fn with_data(&mut self, data: Dynamic) -> RhaiResult<Self> {
        let text = if data.is_string() {
            data.into_string().map_err(runtime_error)?
        } else {
            to_json(&data)?.to_string()
        };
        Ok(self.update(|b| {
            b.with_data(text);
        }))
    }

    fn with_header(&mut self, name: &str, value: Dynamic) -> Self {
        let value = if value.is_unit() {
            None
        } else if value.is_string() {
            value.into_string().ok()
        } else {
            Some(value.to_string())
        };
        self.update(|b| {
            b.with_header(name, value.as_deref());
        })
    }

    fn with_empty(&mut self) -> Self {
        self.update(|b| {
            b.with_empty();
        })
    }

    fn template(&mut self) -> Self {
        self.update(|b| {
            b.template();
        })
    }

    fn with_example_name(&mut self, name: &str) -> Self {
        self.update(|b| {
            b.with_example_name(name);
        })
    }

    fn with_delay(&mut self, ms: i64) -> Self {
        let ms = u64::try_from(ms).unwrap_or(0);
        self.update(|b| {
            b.with_delay(ms);
        })
    }

    fn with_delay_range(&mut self, min: i64, max: i64) -> Self {
        let min = u64::try_from(min).unwrap_or(0);
        let max = u64::try_from(max).unwrap_or(0);
        self.update(|b| {
            b.with_delay_range(min, max);
        })
    }

    fn using_default_behaviour(&mut self) -> RhaiResult<Self> {
        self.configure(|b| b.using_default_behaviour().map(|_| ()))
    }

    fn immediately(&mut self) -> RhaiResult<Self> {
        self.configure(|b| b.immediately().map(|_| ()))
    }

    fn skip_default_behaviour(&mut self) -> RhaiResult<Self> {
        self.configure(|b| b.skip_default_behaviour().map(|_| ()))
    }

    fn punctuation(&mut self) -> Self {
        self.clone()
    }
}

/// `context.request` as seen by scripts.
#[derive(Clone)]
struct RequestBinding {
    uri: String,
    path: String,
    method: String,
    headers: Map,
    path_params: Map,
    query_params: Map,
    body: LazyBody,
}

impl RequestBinding {
    fn from_context(context: &RuntimeContext) -> Self {
        Self {
            uri: context.uri.clone(),
            path: context.path.clone(),
            method: context.method.as_str().to_string(),
            headers: string_map(&context.headers),
            path_params: string_map(&context.path_params),
            query_params: string_map(&context.query_params),
            body: context.body.clone(),
        }
    }

    fn get_uri(&mut self) -> String {
        self.uri.clone()
    }

    fn get_path(&mut self) -> String {
        self.path.clone()
    }

    fn get_method(&mut self) -> String {
        self.method.clone()
    }

    fn get_headers(&mut self) -> Map {
        self.headers.clone()
    }

    fn get_path_params(&mut self) -> Map {
        self.path_params.clone()
    }

    fn get_query_params(&mut self) -> Map {
        self.query_params.clone()
    }

    fn get_body(&mut self) -> String {
        self.body.as_text()
    }
}

/// The `stores` binding.
#[derive(Clone)]
struct ScriptStores(Arc<RequestStores>);

impl ScriptStores {
    fn open(&mut self, name: &str) -> RhaiResult<ScriptStore> {
        self.0
            .get_store_by_name(name, false)
            .map(ScriptStore)
            .map_err(runtime_error)
    }

    fn open_namespaced(&mut self, name: &str, namespace: &str) -> RhaiResult<ScriptStore> {
        self.0
            .get_namespaced_store(name, namespace)
            .map(ScriptStore)
            .map_err(runtime_error)
    }

    fn has_store_with_name(&mut self, name: &str) -> bool {
        self.0.has_store_with_name(name, false)
    }

    fn delete_store(&mut self, name: &str) -> RhaiResult<()> {
        self.0
            .delete_store_by_name(name, false)
            .map_err(runtime_error)
    }
}

#[derive(Clone)]
struct ScriptStore(Arc<dyn Store>);

impl ScriptStore {
    fn save(&mut self, key: &str, value: Dynamic) -> RhaiResult<()> {
        let value = to_json(&value)?;
        self.0.save(key, value).map_err(runtime_error)
    }

    fn load(&mut self, key: &str) -> RhaiResult<Dynamic> {
        match self.0.load(key).map_err(runtime_error)? {
            Some(value) => to_dynamic(&value),
            None => Ok(Dynamic::UNIT),
        }
    }

    fn delete(&mut self, key: &str) -> RhaiResult<()> {
        self.0.delete(key).map_err(runtime_error)
    }

    fn load_all(&mut self) -> RhaiResult<Map> {
        self.0
            .load_all()
            .map_err(runtime_error)?
            .iter()
            .map(|(k, v)| Ok((k.as_str().into(), to_dynamic(v)?)))
            .collect()
    }

    fn has_item_with_key(&mut self, key: &str) -> RhaiResult<bool> {
        self.0.has_item_with_key(key).map_err(runtime_error)
    }

    fn count(&mut self) -> RhaiResult<i64> {
        let count = self.0.count().map_err(runtime_error)?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

fn register_api(engine: &mut Engine) {
    engine.register_fn("respond", respond);

    engine
        .register_type_with_name::<ScriptResponse>("ResponseBehaviour")
        .register_fn("withStatusCode", ScriptResponse::with_status_code)
        .register_fn("withFile", ScriptResponse::with_file)
        .register_fn("withData", ScriptResponse::with_data)
        .register_fn("withHeader", ScriptResponse::with_header)
        .register_fn("withEmpty", ScriptResponse::with_empty)
        .register_fn("template", ScriptResponse::template)
        .register_fn("withExampleName", ScriptResponse::with_example_name)
        .register_fn("withDelay", ScriptResponse::with_delay)
        .register_fn("withDelayRange", ScriptResponse::with_delay_range)
        .register_fn("usingDefaultBehaviour", ScriptResponse::using_default_behaviour)
        .register_fn("immediately", ScriptResponse::immediately)
        .register_fn("skipDefaultBehaviour", ScriptResponse::skip_default_behaviour)
        .register_fn("respond", ScriptResponse::punctuation)
        .register_fn("and", ScriptResponse::punctuation);

    engine
        .register_type_with_name::<RequestBinding>("Request")
        .register_get("uri", RequestBinding::get_uri)
        .register_get("path", RequestBinding::get_path)
        .register_get("method", RequestBinding::get_method)
        .register_get("headers", RequestBinding::get_headers)
        .register_get("pathParams", RequestBinding::get_path_params)
        .register_get("queryParams", RequestBinding::get_query_params)
        .register_get("body", RequestBinding::get_body);

    engine
        .register_type_with_name::<ScriptStores>("Stores")
        .register_fn("open", ScriptStores::open)
        .register_fn("open", ScriptStores::open_namespaced)
        .register_fn("hasStoreWithName", ScriptStores::has_store_with_name)
        .register_fn("deleteStore", ScriptStores::delete_store);

    engine
        .register_type_with_name::<ScriptStore>("Store")
        .register_fn("save", ScriptStore::save)
        .register_fn("load", ScriptStore::load)
        .register_fn("delete", ScriptStore::delete)
        .register_fn("loadAll", ScriptStore::load_all)
        .register_fn("hasItemWithKey", ScriptStore::has_item_with_key)
        .register_fn("count", ScriptStore::count);

    engine.register_fn("log_info", |msg: &str| {
        info!(target: SCRIPT_LOG_TARGET, "{}", msg);
    });
    engine.register_fn("log_warn", |msg: &str| {
        warn!(target: SCRIPT_LOG_TARGET, "{}", msg);
    });
    engine.register_fn("log_debug", |msg: &str| {
        debug!(target: SCRIPT_LOG_TARGET, "{}", msg);
    });
    engine.on_print(|text| info!(target: SCRIPT_LOG_TARGET, "{}", text));
    engine.on_debug(|text, source, pos| {
        debug!(target: SCRIPT_LOG_TARGET, "{} @ {:?} {}", text, source, pos)
    });
}

struct CompiledScript {
    path: PathBuf,
    ast: AST,
    compiled_at: Instant,
}

/// Rhai implementation of [`ScriptExecutor`] with an LRU cache of compiled ASTs.
pub struct RhaiScriptExecutor {
    engine: Engine,
    cache: BoundedCache<PathBuf, Arc<CompiledScript>>,
}

impl RhaiScriptExecutor {
    pub fn new(engine_config: &ScriptEngineConfig, cache: &ScriptCacheConfig) -> Self {
        let mut engine = Engine::new();
        if engine_config.max_operations > 0 {
            engine.set_max_operations(engine_config.max_operations);
        }
        register_api(&mut engine);

        Self {
            engine,
            cache: BoundedCache::new(cache_config(cache)),
        }
    }

    fn compile(&self, path: &Path) -> Result<Arc<CompiledScript>, ScriptError> {
        let source = read_script(path)?;
        let ast = self
            .engine
            .compile(&source)
            .map_err(|e| ScriptError::Compile {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        debug!("Compiled Rhai script {}", path.display());
        Ok(Arc::new(CompiledScript {
            path: path.to_path_buf(),
            ast,
            compiled_at: Instant::now(),
        }))
    }

    fn build_scope(context: &RuntimeContext) -> Result<Scope<'static>, Box<EvalAltResult>> {
        let mut scope = Scope::new();

        let mut context_map = Map::new();
        context_map.insert(
            "request".into(),
            Dynamic::from(RequestBinding::from_context(context)),
        );
        scope.push("context", context_map);

        for (name, binding) in context.bindings.iter() {
            match binding {
                ScriptBinding::Json(value) => {
                    scope.push_dynamic(name.to_string(), to_dynamic(value)?);
                }
                ScriptBinding::Stores(stores) => {
                    scope.push(name.to_string(), ScriptStores(stores.clone()));
                }
            }
        }
        Ok(scope)
    }
}

impl ScriptExecutor for RhaiScriptExecutor {
    fn engine_name(&self) -> &'static str {
        RHAI_ENGINE
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rhai"]
    }

    fn execute_script(
        &self,
        plugin: &PluginConfig,
        resource: &ResourceConfig,
        context: &RuntimeContext,
    ) -> Result<ResponseBehaviour, ScriptError> {
        let path = script_path(plugin, resource)?;
        let compiled = self
            .cache
            .get_or_try_insert_with(path.clone(), || self.compile(&path))?;

        let execution_error = |message: String| ScriptError::Execution {
            path: compiled.path.clone(),
            message,
        };

        let mut scope = Self::build_scope(context).map_err(|e| execution_error(e.to_string()))?;
        let behaviour = SharedBehaviour::new(ResponseBehaviour::from_response_config(
            &resource.response,
        ));

        let result = {
            let _guard = CurrentBehaviourGuard::install(behaviour.clone());
            self.engine.run_ast_with_scope(&mut scope, &compiled.ast)
        };
        drop(scope);

        if let Some(violation) = behaviour.take_violation() {
            return Err(ScriptError::Behaviour {
                path: compiled.path.clone(),
                source: violation,
            });
        }
        result.map_err(|e| execution_error(e.to_string()))?;

        debug!(
            "Executed Rhai script {} (compiled {:?} ago)",
            compiled.path.display(),
            compiled.compiled_at.elapsed()
        );
        Ok(behaviour.into_behaviour())
    }

    fn cache_metrics(&self) -> Option<CacheMetrics> {
        Some(self.cache.metrics())
    }

    fn invalidate(&self, path: &Path) {
        self.cache.invalidate(&path.to_path_buf());
    }
}
