//! Rift Mock: response resolution for API mocking.
//!
//! A [`ResolutionEngine`] matches a request against declared resources, runs
//! the resource's script (Rhai or JavaScript) when one is configured, and
//! returns the [`ResponseBehaviour`] the caller should render. Scripts keep
//! state across calls in named stores backed by memory or Redis.

// ===== Configuration & request model =====
pub mod config;
pub mod error;
pub mod http;

// ===== Resolution pipeline =====
pub mod behaviour;
pub mod cache;
pub mod engine;
pub mod hooks;
pub mod matcher;
pub mod response;

// ===== Scripting & state =====
pub mod script;
pub mod store;

pub mod metrics;

pub use behaviour::{
    BehaviourType, MutableResponseBehaviour, PerformanceSimulation, ReadResponseBehaviour,
    ResponseBehaviour,
};
pub use config::{EngineConfig, PluginConfig, ResourceConfig, ResponseConfig};
pub use engine::{Resolution, ResolutionEngine, ResolvedResponse};
pub use error::{
    BehaviourError, ConfigError, ResolveError, ScriptError, StartupError, StoreError,
};
pub use hooks::{EngineLifecycleListener, LifecycleHooks};
pub use http::{HttpMethod, MockRequest};
pub use response::RenderedResponse;
pub use script::{ScriptExecutor, ScriptExecutorRegistry};
pub use store::{Store, StoreFactory, StoreService};
