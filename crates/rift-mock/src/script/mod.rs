//! Script execution: engines, the shared behaviour handle and the registry
//! that picks an engine per script.

mod context;
#[cfg(feature = "javascript")]
mod js_engine;
mod rhai_engine;

pub use context::{AdditionalBindings, ExecutionContext, RuntimeContext, ScriptBinding};
#[cfg(feature = "javascript")]
pub use js_engine::JsScriptExecutor;
pub use rhai_engine::RhaiScriptExecutor;

use crate::behaviour::ResponseBehaviour;
use crate::cache::{BoundedCacheConfig, CacheMetrics};
use crate::config::{EngineConfig, PluginConfig, ResourceConfig, ScriptCacheConfig};
use crate::error::{BehaviourError, ConfigError, ScriptError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const RHAI_ENGINE: &str = "rhai";
pub const JAVASCRIPT_ENGINE: &str = "javascript";

/// A script engine able to run resource scripts against a runtime context.
pub trait ScriptExecutor: Send + Sync {
    /// Registry identifier, e.g. `rhai`.
    fn engine_name(&self) -> &'static str;

    /// File extensions (without dot) this engine claims.
    fn extensions(&self) -> &'static [&'static str];

    /// Run the resource's script and return the behaviour it produced.
    ///
    /// The script receives a behaviour pre-populated from the resource's
    /// response config and not yet configured.
    fn execute_script(
        &self,
        plugin: &PluginConfig,
        resource: &ResourceConfig,
        context: &RuntimeContext,
    ) -> Result<ResponseBehaviour, ScriptError>;

    fn cache_metrics(&self) -> Option<CacheMetrics> {
        None
    }

    /// Drop any compiled form of the script at `path`.
    fn invalidate(&self, _path: &Path) {}
}

/// Absolute script path for a resource: its directory plus `scriptFile`.
pub fn script_path(plugin: &PluginConfig, resource: &ResourceConfig) -> Result<PathBuf, ScriptError> {
    resource
        .response
        .script_file
        .as_deref()
        .map(|file| plugin.resolve_resource_path(resource, file))
        .ok_or_else(|| ScriptError::MissingScript {
            resource: resource.describe(),
        })
}

pub(crate) fn cache_config(config: &ScriptCacheConfig) -> BoundedCacheConfig {
    BoundedCacheConfig::new(config.max_entries).with_ttl(Duration::from_secs(config.ttl_seconds))
}

pub(crate) fn read_script(path: &Path) -> Result<String, ScriptError> {
    std::fs::read_to_string(path).map_err(|source| ScriptError::Load {
        path: path.to_path_buf(),
        source,
    })
}

/// Behaviour handle shared between the executor and script-side bindings.
///
/// Contract violations are recorded so they fail the request even when the
/// script catches the error.
#[derive(Clone, Debug)]
pub(crate) struct SharedBehaviour {
    inner: Arc<Mutex<ResponseBehaviour>>,
    violation: Arc<Mutex<Option<BehaviourError>>>,
}

impl SharedBehaviour {
    pub(crate) fn new(behaviour: ResponseBehaviour) -> Self {
        Self {
            inner: Arc::new(Mutex::new(behaviour)),
            violation: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ResponseBehaviour),
    {
        let mut guard = self.inner.lock();
        f(&mut *guard);
    }

    pub(crate) fn try_update<F>(&self, f: F) -> Result<(), BehaviourError>
    where
        F: FnOnce(&mut ResponseBehaviour) -> Result<(), BehaviourError>,
    {
        let result = {
            let mut guard = self.inner.lock();
            f(&mut *guard)
        };
        if let Err(e) = &result {
            self.violation.lock().get_or_insert_with(|| e.clone());
        }
        result
    }

    pub(crate) fn take_violation(&self) -> Option<BehaviourError> {
        self.violation.lock().take()
    }

    pub(crate) fn into_behaviour(self) -> ResponseBehaviour {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner.into_inner(),
            Err(shared) => shared.lock().clone(),
        }
    }
}

/// Engines by name, with selection by script extension.
#[derive(Clone)]
pub struct ScriptExecutorRegistry {
    executors: HashMap<&'static str, Arc<dyn ScriptExecutor>>,
    default_engine: &'static str,
}

impl ScriptExecutorRegistry {
    pub fn new(default_engine: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            executors: HashMap::new(),
            default_engine: canonical_engine_name(default_engine)?,
        })
    }

    /// Registry with every engine compiled into this build.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new(&config.script_engine.engine)?;
        registry.register(Arc::new(RhaiScriptExecutor::new(
            &config.script_engine,
            &config.script_cache,
        )));
        #[cfg(feature = "javascript")]
        registry.register(Arc::new(JsScriptExecutor::new(
            &config.script_engine,
            &config.script_cache,
        )));

        if !registry.executors.contains_key(registry.default_engine) {
            return Err(ConfigError::UnknownEngine(config.script_engine.engine.clone()));
        }
        tracing::info!(
            "Script engines: {:?} (default: {})",
            registry.engine_names(),
            registry.default_engine
        );
        Ok(registry)
    }

    pub fn register(&mut self, executor: Arc<dyn ScriptExecutor>) {
        self.executors.insert(executor.engine_name(), executor);
    }

    pub fn get(&self, engine: &str) -> Option<&Arc<dyn ScriptExecutor>> {
        let name = canonical_engine_name(engine).ok()?;
        self.executors.get(name)
    }

    pub fn engine_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.executors.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn default_engine(&self) -> &'static str {
        self.default_engine
    }

    /// Engine for a script: the one claiming its extension, else the default.
    pub fn select(&self, script: &Path) -> Result<&Arc<dyn ScriptExecutor>, ScriptError> {
        let by_extension = script
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| {
                self.executors.values().find(|executor| {
                    executor
                        .extensions()
                        .iter()
                        .any(|claimed| claimed.eq_ignore_ascii_case(ext))
                })
            });

        if let Some(executor) = by_extension {
            return Ok(executor);
        }

        if let Some(err) = disabled_engine_for(script) {
            return Err(err);
        }

        self.executors
            .get(self.default_engine)
            .ok_or_else(|| ScriptError::UnknownEngine(self.default_engine.to_string()))
    }

    /// Drop the compiled form of `path` from every engine.
    pub fn invalidate(&self, path: &Path) {
        for executor in self.executors.values() {
            executor.invalidate(path);
        }
    }

    /// Cache metrics per engine, for engines that cache.
    pub fn cache_metrics(&self) -> Vec<(&'static str, CacheMetrics)> {
        let mut metrics: Vec<_> = self
            .executors
            .iter()
            .filter_map(|(name, executor)| executor.cache_metrics().map(|m| (*name, m)))
            .collect();
        metrics.sort_by_key(|(name, _)| *name);
        metrics
    }
}

#[cfg(feature = "javascript")]
fn disabled_engine_for(_script: &Path) -> Option<ScriptError> {
    None
}

#[cfg(not(feature = "javascript"))]
fn disabled_engine_for(script: &Path) -> Option<ScriptError> {
    script
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("js"))
        .then_some(ScriptError::EngineDisabled {
            engine: JAVASCRIPT_ENGINE,
            feature: "javascript",
        })
}

fn canonical_engine_name(engine: &str) -> Result<&'static str, ConfigError> {
    match engine.to_ascii_lowercase().as_str() {
        "rhai" => Ok(RHAI_ENGINE),
        "javascript" | "js" => Ok(JAVASCRIPT_ENGINE),
        _ => Err(ConfigError::UnknownEngine(engine.to_string())),
    }
}
