//! Script engine and compiled-script cache configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptEngineConfig {
    /// Engine used when a script's extension does not pick one ("rhai" or "javascript")
    #[serde(default = "default_engine_type")]
    pub engine: String,
    /// Upper bound on operations per Rhai script run (0 = unlimited)
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
}

fn default_engine_type() -> String {
    "rhai".to_string()
}

fn default_max_operations() -> u64 {
    1_000_000
}

impl Default for ScriptEngineConfig {
    fn default() -> Self {
        Self {
            engine: default_engine_type(),
            max_operations: default_max_operations(),
        }
    }
}

/// Compiled script cache configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCacheConfig {
    /// Maximum number of compiled scripts kept per engine (LRU eviction when exceeded)
    #[serde(default = "default_script_cache_entries")]
    pub max_entries: usize,
    /// TTL for compiled scripts in seconds (0 = no expiration)
    #[serde(default)]
    pub ttl_seconds: u64,
}

pub(crate) fn default_script_cache_entries() -> usize {
    20
}

impl Default for ScriptCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_script_cache_entries(),
            ttl_seconds: 0,
        }
    }
}
