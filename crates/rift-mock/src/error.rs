//! Error taxonomy for the resolution engine.
//!
//! Each concern gets its own error type so callers can tell a broken
//! configuration (fatal at load) from a failing script (fatal for one
//! request) from a misbehaving store backend (fatal at construction).

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors, raised while loading or validating plugin config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid path pattern '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid predicate on resource '{resource}': {reason}")]
    InvalidPredicate { resource: String, reason: String },

    #[error("Script file not found for resource '{resource}': {path}")]
    ScriptNotFound { resource: String, path: PathBuf },

    #[error("No script engine registered for '{0}'")]
    UnknownEngine(String),

    #[error("No usable script engine for resource '{resource}': {reason}")]
    NoScriptEngine { resource: String, reason: String },

    #[error("Invalid performance simulation: {0}")]
    InvalidDelay(String),

    #[error("Unknown store driver: {0}")]
    UnknownStoreDriver(String),

    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Contract violations on a [`crate::ResponseBehaviour`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BehaviourError {
    #[error("behaviour already configured: {current} (attempted {attempted})")]
    AlreadyConfigured {
        current: &'static str,
        attempted: &'static str,
    },

    #[error("invalid status code: {0}")]
    InvalidStatusCode(i64),
}

/// Failures while compiling or running a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to read script {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to compile script {path}: {message}")]
    Compile { path: PathBuf, message: String },

    #[error("Script execution error in {path}: {message}")]
    Execution { path: PathBuf, message: String },

    #[error("Resource '{resource}' has no script file configured")]
    MissingScript { resource: String },

    #[error("No script engine registered for '{0}'")]
    UnknownEngine(String),

    #[error("Script engine '{engine}' is not enabled. Enable the '{feature}' feature flag")]
    EngineDisabled {
        engine: &'static str,
        feature: &'static str,
    },

    #[error("Script {path} violated the behaviour contract: {source}")]
    Behaviour {
        path: PathBuf,
        #[source]
        source: BehaviourError,
    },
}

/// Store backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation '{operation}' failed on store '{store}': {message}")]
    Operation {
        store: String,
        operation: &'static str,
        message: String,
    },

    #[error("Failed to encode value for store '{store}': {source}")]
    Codec {
        store: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("The request store is only available while handling a request")]
    OutsideRequestScope,

    #[error("Store driver '{driver}' is not available. Compile with --features {feature}")]
    DriverDisabled {
        driver: String,
        feature: &'static str,
    },
}

/// Request-level failures surfaced by the resolution pipeline.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Behaviour(#[from] BehaviourError),

    #[error("Failed to read response file {path}: {source}")]
    ResponseFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    /// HTTP status code the rendering layer should use for this failure.
    pub fn status_code(&self) -> u16 {
        500
    }
}

/// Failures while assembling a [`crate::ResolutionEngine`].
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behaviour_error_message_is_descriptive() {
        let err = BehaviourError::AlreadyConfigured {
            current: "DEFAULT_BEHAVIOUR",
            attempted: "IMMEDIATE_RESPONSE",
        };
        let msg = err.to_string();
        assert!(msg.contains("behaviour already configured"));
        assert!(msg.contains("DEFAULT_BEHAVIOUR"));
        assert!(msg.contains("IMMEDIATE_RESPONSE"));
    }

    #[test]
    fn test_resolve_error_wraps_script_error() {
        let err: ResolveError = ScriptError::Execution {
            path: PathBuf::from("/tmp/test.rhai"),
            message: "boom".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_store_driver_disabled_message() {
        let err = StoreError::DriverDisabled {
            driver: "redis".to_string(),
            feature: "redis-backend",
        };
        assert!(err.to_string().contains("--features redis-backend"));
    }
}
