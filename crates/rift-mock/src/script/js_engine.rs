//! JavaScript script engine backed by Boa.
//!
//! # Script Interface
//!
//! Scripts run as plain top-level code in a fresh context per request. The
//! globals mirror the Rhai engine:
//!
//! - `context.request` with `uri`, `path`, `method`, `headers`,
//!   `pathParams`, `queryParams` and a lazily read `body`
//! - `respond()` returning the fluent response behaviour
//! - `stores.open(name)`, `stores.open(name, namespace)`,
//!   `stores.hasStoreWithName(name)`, `stores.deleteStore(name)`
//! - `log_info`, `log_warn`, `log_debug` and a minimal `console`
//!
//! ```javascript
//! var id = context.request.pathParams.id;
//! if (id === "0") {
//!     respond().withStatusCode(404).and().skipDefaultBehaviour();
//! } else {
//!     stores.open("visits").save(id, true);
//!     respond().withHeader("X-Pet", id).usingDefaultBehaviour();
//! }
//! ```

use super::{
    cache_config, read_script, script_path, RuntimeContext, ScriptBinding, ScriptExecutor,
    SharedBehaviour, JAVASCRIPT_ENGINE,
};
use crate::behaviour::{MutableResponseBehaviour, ResponseBehaviour};
use crate::cache::{BoundedCache, CacheMetrics};
use crate::config::{PluginConfig, ResourceConfig, ScriptCacheConfig, ScriptEngineConfig};
use crate::error::{BehaviourError, ScriptError};
use crate::http::LazyBody;
use crate::store::{RequestStores, Store};
use boa_engine::{
    js_string, native_function::NativeFunction, object::builtins::JsArray,
    property::{PropertyDescriptor, PropertyKey},
    Context, JsError, JsNativeError, JsObject, JsResult, JsValue, Script, Source,
};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SCRIPT_LOG_TARGET: &str = "rift_mock::script";
const BEHAVIOUR_GLOBAL: &str = "__behaviour";
const STORE_NAME_PROPERTY: &str = "__store";
const STORE_NAMESPACE_PROPERTY: &str = "__namespace";

type NativeFn = fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>;

/// State native functions reach for while a script runs on this thread.
struct CurrentExecution {
    behaviour: SharedBehaviour,
    stores: Option<Arc<RequestStores>>,
    body: LazyBody,
}

thread_local! {
    static CURRENT_EXECUTION: RefCell<Option<CurrentExecution>> = const { RefCell::new(None) };
}

struct CurrentExecutionGuard;

impl CurrentExecutionGuard {
    fn install(execution: CurrentExecution) -> Self {
        CURRENT_EXECUTION.with(|e| *e.borrow_mut() = Some(execution));
        CurrentExecutionGuard
    }
}

impl Drop for CurrentExecutionGuard {
    fn drop(&mut self) {
        CURRENT_EXECUTION.with(|e| *e.borrow_mut() = None);
    }
}

fn with_current_execution<T>(f: impl FnOnce(&CurrentExecution) -> T) -> JsResult<T> {
    CURRENT_EXECUTION
        .with(|e| e.borrow().as_ref().map(f))
        .ok_or_else(|| {
            JsNativeError::error()
                .with_message("called outside of a script execution")
                .into()
        })
}

/// Create a JavaScript object with proper Object.prototype
fn create_js_object(context: &Context) -> JsObject {
    JsObject::with_object_proto(context.intrinsics())
}

fn register_method(
    obj: &JsObject,
    name: &str,
    func: NativeFn,
    context: &mut Context,
) -> JsResult<()> {
    obj.set(
        PropertyKey::from(js_string!(name)),
        NativeFunction::from_fn_ptr(func).to_js_function(context.realm()),
        false,
        context,
    )
    .map(|_| ())
}

fn string_arg(args: &[JsValue], index: usize, what: &'static str) -> JsResult<String> {
    args.get(index)
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| JsNativeError::typ().with_message(what).into())
}

fn number_arg(args: &[JsValue], index: usize, what: &'static str) -> JsResult<f64> {
    args.get(index)
        .and_then(|v| v.as_number())
        .ok_or_else(|| JsNativeError::typ().with_message(what).into())
}

fn millis_arg(args: &[JsValue], index: usize) -> JsResult<u64> {
    let ms = number_arg(args, index, "delay must be a number of milliseconds")?;
    Ok(if ms.is_finite() && ms > 0.0 { ms as u64 } else { 0 })
}

/// Stringify a script value: strings as-is, everything else as JSON.
fn text_of(context: &mut Context, value: &JsValue) -> JsResult<String> {
    if let Some(s) = value.as_string() {
        return Ok(s.to_std_string_escaped());
    }
    Ok(js_to_json(context, value)?.to_string())
}

fn behaviour_error(e: BehaviourError) -> JsError {
    JsNativeError::error().with_message(e.to_string()).into()
}

fn store_error(e: crate::error::StoreError) -> JsError {
    JsNativeError::error().with_message(e.to_string()).into()
}

// Behaviour methods. Each returns `this` so calls chain.

fn update_behaviour(this: &JsValue, f: impl FnOnce(&mut ResponseBehaviour)) -> JsResult<JsValue> {
    with_current_execution(|e| e.behaviour.update(f))?;
    Ok(this.clone())
}

fn configure_behaviour(
    this: &JsValue,
    f: impl FnOnce(&mut ResponseBehaviour) -> Result<(), BehaviourError>,
) -> JsResult<JsValue> {
    with_current_execution(|e| e.behaviour.try_update(f))?.map_err(behaviour_error)?;
    Ok(this.clone())
}

fn js_respond(_this: &JsValue, _args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    with_current_execution(|_| ())?;
    let global = ctx.global_object();
    global.get(js_string!(BEHAVIOUR_GLOBAL), ctx)
}

fn behaviour_punctuation(this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    Ok(this.clone())
}

fn behaviour_with_status_code(
    this: &JsValue,
    args: &[JsValue],
    _ctx: &mut Context,
) -> JsResult<JsValue> {
    let code = number_arg(args, 0, "status code must be a number")?;
    configure_behaviour(this, |b| b.try_with_status_code(code as i64).map(|_| ()))
}

fn behaviour_with_file(this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let file = string_arg(args, 0, "file must be a string")?;
    update_behaviour(this, |b| {
        b.with_file(file);
    })
}

fn behaviour_with_data(this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let data = text_of(ctx, args.first().unwrap_or(&JsValue::undefined()))?;
    update_behaviour(this, |b| {
        b.with_data(data);
    })
}

fn behaviour_with_header(this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "header name must be a string")?;
    let value = match args.get(1) {
        None => None,
        Some(v) if v.is_null() || v.is_undefined() => None,
        Some(v) => match v.as_number() {
            Some(n) => Some(n.to_string()),
            None => Some(text_of(ctx, v)?),
        },
    };
    update_behaviour(this, |b| {
        b.with_header(&name, value.as_deref());
    })
}

fn behaviour_with_empty(this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    update_behaviour(this, |b| {
        b.with_empty();
    })
}

fn behaviour_template(this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    update_behaviour(this, |b| {
        b.template();
    })
}

fn behaviour_with_example_name(
    this: &JsValue,
    args: &[JsValue],
    _ctx: &mut Context,
) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "example name must be a string")?;
    update_behaviour(this, |b| {
        b.with_example_name(name);
    })
}

fn behaviour_with_delay(this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let ms = millis_arg(args, 0)?;
    update_behaviour(this, |b| {
        b.with_delay(ms);
    })
}

fn behaviour_with_delay_range(
    this: &JsValue,
    args: &[JsValue],
    _ctx: &mut Context,
) -> JsResult<JsValue> {
    let min = millis_arg(args, 0)?;
    let max = millis_arg(args, 1)?;
    update_behaviour(this, |b| {
        b.with_delay_range(min, max);
    })
}

fn behaviour_using_default(
    this: &JsValue,
    _args: &[JsValue],
    _ctx: &mut Context,
) -> JsResult<JsValue> {
    configure_behaviour(this, |b| b.using_default_behaviour().map(|_| ()))
}

fn behaviour_immediately(this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    configure_behaviour(this, |b| b.immediately().map(|_| ()))
}

fn behaviour_skip_default(
    this: &JsValue,
    _args: &[JsValue],
    _ctx: &mut Context,
) -> JsResult<JsValue> {
    configure_behaviour(this, |b| b.skip_default_behaviour().map(|_| ()))
}

fn create_behaviour_object(context: &mut Context) -> JsResult<JsObject> {
    let obj = create_js_object(context);
    let methods: [(&str, NativeFn); 15] = [
        ("withStatusCode", behaviour_with_status_code),
        ("withFile", behaviour_with_file),
        ("withData", behaviour_with_data),
        ("withHeader", behaviour_with_header),
        ("withEmpty", behaviour_with_empty),
        ("template", behaviour_template),
        ("withExampleName", behaviour_with_example_name),
        ("withDelay", behaviour_with_delay),
        ("withDelayRange", behaviour_with_delay_range),
        ("usingDefaultBehaviour", behaviour_using_default),
        ("immediately", behaviour_immediately),
        ("skipDefaultBehaviour", behaviour_skip_default),
        ("respond", behaviour_punctuation),
        ("and", behaviour_punctuation),
        ("toString", behaviour_to_string),
    ];
    for (name, func) in methods {
        register_method(&obj, name, func, context)?;
    }
    Ok(obj)
}

fn behaviour_to_string(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::from(js_string!("[ResponseBehaviour]")))
}

// Stores

fn current_stores() -> JsResult<Arc<RequestStores>> {
    with_current_execution(|e| e.stores.clone())?.ok_or_else(|| {
        JsNativeError::error()
            .with_message("stores are not available for this request")
            .into()
    })
}

/// Resolve the store a store object was opened for.
fn resolve_store(this: &JsValue, ctx: &mut Context) -> JsResult<Arc<dyn Store>> {
    let obj = this
        .as_object()
        .ok_or_else(|| JsNativeError::typ().with_message("not a store object"))?;
    let name = obj
        .get(js_string!(STORE_NAME_PROPERTY), ctx)?
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| JsNativeError::typ().with_message("not a store object"))?;
    let namespace = obj
        .get(js_string!(STORE_NAMESPACE_PROPERTY), ctx)?
        .as_string()
        .map(|s| s.to_std_string_escaped());

    let stores = current_stores()?;
    let store = match namespace {
        Some(ns) => stores.get_namespaced_store(&name, &ns),
        None => stores.get_store_by_name(&name, false),
    };
    store.map_err(store_error)
}

fn stores_open(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "store name must be a string")?;
    let namespace = args
        .get(1)
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped());

    // Fail on open rather than on first use.
    let stores = current_stores()?;
    match &namespace {
        Some(ns) => stores.get_namespaced_store(&name, ns),
        None => stores.get_store_by_name(&name, false),
    }
    .map_err(store_error)?;

    let obj = create_js_object(ctx);
    obj.set(js_string!(STORE_NAME_PROPERTY), js_string!(name), false, ctx)?;
    if let Some(ns) = namespace {
        obj.set(js_string!(STORE_NAMESPACE_PROPERTY), js_string!(ns), false, ctx)?;
    }
    let methods: [(&str, NativeFn); 6] = [
        ("save", store_save),
        ("load", store_load),
        ("delete", store_delete),
        ("loadAll", store_load_all),
        ("hasItemWithKey", store_has_item_with_key),
        ("count", store_count),
    ];
    for (method, func) in methods {
        register_method(&obj, method, func, ctx)?;
    }
    Ok(obj.into())
}

fn stores_has_store_with_name(
    _this: &JsValue,
    args: &[JsValue],
    _ctx: &mut Context,
) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "store name must be a string")?;
    Ok(JsValue::from(current_stores()?.has_store_with_name(&name, false)))
}

fn stores_delete_store(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "store name must be a string")?;
    current_stores()?
        .delete_store_by_name(&name, false)
        .map_err(store_error)?;
    Ok(JsValue::undefined())
}

fn store_save(this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = string_arg(args, 0, "key must be a string")?;
    let value = js_to_json(ctx, args.get(1).unwrap_or(&JsValue::null()))?;
    resolve_store(this, ctx)?
        .save(&key, value)
        .map_err(store_error)?;
    Ok(JsValue::undefined())
}

fn store_load(this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = string_arg(args, 0, "key must be a string")?;
    match resolve_store(this, ctx)?.load(&key).map_err(store_error)? {
        Some(value) => json_to_js(ctx, &value),
        None => Ok(JsValue::null()),
    }
}

fn store_delete(this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = string_arg(args, 0, "key must be a string")?;
    resolve_store(this, ctx)?.delete(&key).map_err(store_error)?;
    Ok(JsValue::undefined())
}

fn store_load_all(this: &JsValue, _args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let all = resolve_store(this, ctx)?.load_all().map_err(store_error)?;
    json_to_js(ctx, &Value::Object(all.into_iter().collect()))
}

fn store_has_item_with_key(this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = string_arg(args, 0, "key must be a string")?;
    let exists = resolve_store(this, ctx)?
        .has_item_with_key(&key)
        .map_err(store_error)?;
    Ok(JsValue::from(exists))
}

fn store_count(this: &JsValue, _args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let count = resolve_store(this, ctx)?.count().map_err(store_error)?;
    Ok(JsValue::from(count as f64))
}

fn create_stores_object(context: &mut Context) -> JsResult<JsObject> {
    let obj = create_js_object(context);
    register_method(&obj, "open", stores_open, context)?;
    register_method(&obj, "hasStoreWithName", stores_has_store_with_name, context)?;
    register_method(&obj, "deleteStore", stores_delete_store, context)?;
    Ok(obj)
}

// Logging

fn joined_args(args: &[JsValue]) -> String {
    args.iter()
        .map(|v| match v.as_string() {
            Some(s) => s.to_std_string_escaped(),
            None => v.display().to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn js_log_info(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    info!(target: SCRIPT_LOG_TARGET, "{}", joined_args(args));
    Ok(JsValue::undefined())
}

fn js_log_warn(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    warn!(target: SCRIPT_LOG_TARGET, "{}", joined_args(args));
    Ok(JsValue::undefined())
}

fn js_log_debug(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    debug!(target: SCRIPT_LOG_TARGET, "{}", joined_args(args));
    Ok(JsValue::undefined())
}

fn create_console_object(context: &mut Context) -> JsResult<JsObject> {
    let obj = create_js_object(context);
    register_method(&obj, "log", js_log_info, context)?;
    register_method(&obj, "info", js_log_info, context)?;
    register_method(&obj, "warn", js_log_warn, context)?;
    register_method(&obj, "error", js_log_warn, context)?;
    register_method(&obj, "debug", js_log_debug, context)?;
    Ok(obj)
}

// Request

fn request_body(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let text = with_current_execution(|e| e.body.as_text())?;
    Ok(JsValue::from(js_string!(text)))
}

fn string_map_object(context: &mut Context, map: &HashMap<String, String>) -> JsResult<JsObject> {
    let obj = create_js_object(context);
    for (k, v) in map {
        obj.set(
            js_string!(k.clone()),
            JsValue::from(js_string!(v.clone())),
            false,
            context,
        )?;
    }
    Ok(obj)
}

fn create_request_object(context: &mut Context, runtime: &RuntimeContext) -> JsResult<JsObject> {
    let obj = create_js_object(context);
    obj.set(js_string!("uri"), js_string!(runtime.uri.clone()), false, context)?;
    obj.set(js_string!("path"), js_string!(runtime.path.clone()), false, context)?;
    obj.set(
        js_string!("method"),
        js_string!(runtime.method.as_str()),
        false,
        context,
    )?;

    let headers = string_map_object(context, &runtime.headers)?;
    obj.set(js_string!("headers"), headers, false, context)?;
    let path_params = string_map_object(context, &runtime.path_params)?;
    obj.set(js_string!("pathParams"), path_params, false, context)?;
    let query_params = string_map_object(context, &runtime.query_params)?;
    obj.set(js_string!("queryParams"), query_params, false, context)?;

    // Read through an accessor so the body is only loaded when asked for.
    let getter = NativeFunction::from_fn_ptr(request_body).to_js_function(context.realm());
    obj.define_property_or_throw(
        js_string!("body"),
        PropertyDescriptor::builder()
            .get(getter)
            .enumerable(true)
            .configurable(true)
            .build(),
        context,
    )?;
    Ok(obj)
}

fn install_globals(context: &mut Context, runtime: &RuntimeContext) -> JsResult<()> {
    let global = context.global_object();

    let request = create_request_object(context, runtime)?;
    let script_context = create_js_object(context);
    script_context.set(js_string!("request"), request, false, context)?;
    global.set(js_string!("context"), script_context, false, context)?;

    let behaviour = create_behaviour_object(context)?;
    global.set(js_string!(BEHAVIOUR_GLOBAL), behaviour, false, context)?;
    register_method(&global, "respond", js_respond, context)?;

    let console = create_console_object(context)?;
    global.set(js_string!("console"), console, false, context)?;
    register_method(&global, "log_info", js_log_info, context)?;
    register_method(&global, "log_warn", js_log_warn, context)?;
    register_method(&global, "log_debug", js_log_debug, context)?;

    for (name, binding) in runtime.bindings.iter() {
        let value: JsValue = match binding {
            ScriptBinding::Json(value) => json_to_js(context, value)?,
            ScriptBinding::Stores(_) => create_stores_object(context)?.into(),
        };
        global.set(js_string!(name), value, false, context)?;
    }
    Ok(())
}

/// Convert JSON Value to JavaScript value
fn json_to_js(context: &mut Context, value: &Value) -> JsResult<JsValue> {
    match value {
        Value::Null => Ok(JsValue::null()),
        Value::Bool(b) => Ok(JsValue::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(JsValue::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(JsValue::from(f))
            } else {
                Ok(JsValue::null())
            }
        }
        Value::String(s) => Ok(JsValue::from(js_string!(s.clone()))),
        Value::Array(arr) => {
            let js_arr = JsArray::new(context);
            for (i, v) in arr.iter().enumerate() {
                let js_val = json_to_js(context, v)?;
                js_arr.set(i as u32, js_val, false, context)?;
            }
            Ok(js_arr.into())
        }
        Value::Object(obj) => {
            let js_obj = create_js_object(context);
            for (k, v) in obj {
                let js_val = json_to_js(context, v)?;
                js_obj.set(js_string!(k.clone()), js_val, false, context)?;
            }
            Ok(js_obj.into())
        }
    }
}

/// Convert JavaScript value to JSON Value. Functions are dropped.
fn js_to_json(context: &mut Context, value: &JsValue) -> JsResult<Value> {
    if value.is_null() || value.is_undefined() {
        return Ok(Value::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(Value::Bool(b));
    }

    if let Some(n) = value.as_number() {
        // Integral numbers stay integers so they compare equal after a round trip.
        if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            return Ok(Value::from(n as i64));
        }
        return Ok(serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }

    if let Some(s) = value.as_string() {
        return Ok(Value::String(s.to_std_string_escaped()));
    }

    if let Some(obj) = value.as_object() {
        if obj.is_array() {
            let len = obj
                .get(js_string!("length"), context)?
                .as_number()
                .unwrap_or(0.0) as u32;
            let mut arr = Vec::new();
            for i in 0..len {
                let item = obj.get(i, context)?;
                arr.push(js_to_json(context, &item)?);
            }
            return Ok(Value::Array(arr));
        }

        let mut map = serde_json::Map::new();
        for key in obj.own_property_keys(context)? {
            let key_str = match &key {
                PropertyKey::String(s) => s.to_std_string_escaped(),
                PropertyKey::Index(i) => i.get().to_string(),
                PropertyKey::Symbol(_) => continue,
            };
            let val = obj.get(key.clone(), context)?;
            if val.is_callable() {
                continue;
            }
            map.insert(key_str, js_to_json(context, &val)?);
        }
        return Ok(Value::Object(map));
    }

    Ok(Value::Null)
}

/// JavaScript implementation of [`ScriptExecutor`].
///
/// Boa cannot persist compiled scripts across contexts, so the cache keeps
/// sources that are known to parse.
pub struct JsScriptExecutor {
    cache: BoundedCache<PathBuf, Arc<str>>,
    /// Iterations allowed per loop; `None` leaves Boa unbounded
    loop_iteration_limit: Option<u64>,
}

impl JsScriptExecutor {
    pub fn new(engine: &ScriptEngineConfig, cache: &ScriptCacheConfig) -> Self {
        Self {
            cache: BoundedCache::new(cache_config(cache)),
            loop_iteration_limit: (engine.max_operations > 0).then_some(engine.max_operations),
        }
    }

    fn new_context(&self) -> Context {
        let mut context = Context::default();
        if let Some(limit) = self.loop_iteration_limit {
            context.runtime_limits_mut().set_loop_iteration_limit(limit);
        }
        context
    }

    fn compile(path: &Path) -> Result<Arc<str>, ScriptError> {
        let source = read_script(path)?;
        let mut context = Context::default();
        Script::parse(Source::from_bytes(source.as_bytes()), None, &mut context).map_err(|e| {
            ScriptError::Compile {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        debug!("Parsed JavaScript script {}", path.display());
        Ok(Arc::from(source))
    }
}

impl ScriptExecutor for JsScriptExecutor {
    fn engine_name(&self) -> &'static str {
        JAVASCRIPT_ENGINE
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["js"]
    }

    fn execute_script(
        &self,
        plugin: &PluginConfig,
        resource: &ResourceConfig,
        context: &RuntimeContext,
    ) -> Result<ResponseBehaviour, ScriptError> {
        let path = script_path(plugin, resource)?;
        let source = self
            .cache
            .get_or_try_insert_with(path.clone(), || Self::compile(&path))?;
        let execution_error = |message: String| ScriptError::Execution {
            path: path.clone(),
            message,
        };

        let behaviour = SharedBehaviour::new(ResponseBehaviour::from_response_config(
            &resource.response,
        ));

        let result = {
            let _guard = CurrentExecutionGuard::install(CurrentExecution {
                behaviour: behaviour.clone(),
                stores: context.stores().cloned(),
                body: context.body.clone(),
            });
            let mut js = self.new_context();
            install_globals(&mut js, context)
                .and_then(|_| js.eval(Source::from_bytes(source.as_bytes())).map(|_| ()))
        };

        if let Some(violation) = behaviour.take_violation() {
            return Err(ScriptError::Behaviour {
                path,
                source: violation,
            });
        }
        result.map_err(|e| execution_error(e.to_string()))?;

        debug!("Executed JavaScript script {}", path.display());
        Ok(behaviour.into_behaviour())
    }

    fn cache_metrics(&self) -> Option<CacheMetrics> {
        Some(self.cache.metrics())
    }

    fn invalidate(&self, path: &Path) {
        self.cache.invalidate(&path.to_path_buf());
    }
}
