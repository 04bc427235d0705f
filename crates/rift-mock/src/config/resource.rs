//! Plugin, resource and response configuration.
//!
//! Field names follow the external config contract (`path`, `method`,
//! `contentType`, `response.staticFile`, `response.scriptFile`, ...).

use crate::behaviour::PerformanceSimulation;
use crate::error::ConfigError;
use crate::http::HttpMethod;
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Comparison applied by a request predicate.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum MatchOperator {
    #[default]
    EqualTo,
    NotEqualTo,
    Contains,
    NotContains,
    Matches,
    NotMatches,
    Exists,
    NotExists,
}

/// Expected value for a query parameter, header or path parameter.
///
/// Accepts either a bare string (equality) or `{value, operator}`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ValueMatch {
    Simple(String),
    Detailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default)]
        operator: MatchOperator,
    },
}

impl ValueMatch {
    pub fn operator(&self) -> MatchOperator {
        match self {
            ValueMatch::Simple(_) => MatchOperator::EqualTo,
            ValueMatch::Detailed { operator, .. } => *operator,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            ValueMatch::Simple(v) => Some(v.as_str()),
            ValueMatch::Detailed { value, .. } => value.as_deref(),
        }
    }
}

/// Request body predicate, optionally scoped to a JSONPath expression.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RequestBodyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub operator: MatchOperator,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResponseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_data: Option<String>,
    #[serde(default)]
    pub template: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Declaration order is kept
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<PerformanceSimulation>,
    /// Example name used by OpenAPI-backed plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_name: Option<String>,
}

impl ResponseConfig {
    /// Explicit status code wins, otherwise 200.
    pub fn effective_status_code(&self) -> u16 {
        self.status_code.unwrap_or(200)
    }

    pub fn has_script(&self) -> bool {
        self.script_file.is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    /// Optional label used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Unset matches GET only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_params: BTreeMap<String, ValueMatch>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub request_headers: BTreeMap<String, ValueMatch>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub path_params: BTreeMap<String, ValueMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBodyConfig>,
    #[serde(default)]
    pub response: ResponseConfig,
    /// Directory relative script and file paths resolve against
    #[serde(skip)]
    pub parent_dir: PathBuf,
}

impl ResourceConfig {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method: Some(method),
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_response(mut self, response: ResponseConfig) -> Self {
        self.response = response;
        self
    }

    pub fn effective_method(&self) -> HttpMethod {
        self.method.unwrap_or_default()
    }

    /// Human readable label: the name if set, else `METHOD path`.
    pub fn describe(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!(
                "{} {}",
                self.effective_method(),
                self.path.as_deref().unwrap_or("*")
            ),
        }
    }
}

/// One plugin's configuration: an optional root resource plus the ordered
/// list of declared resources.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    /// Root resource path; when unset the root response applies to any path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Root resource response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseConfig>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(skip)]
    pub parent_dir: PathBuf,
}

impl PluginConfig {
    /// Load a plugin config from a YAML or JSON file.
    ///
    /// The file's directory becomes the parent directory of every resource.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: PluginConfig = if is_json {
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config.with_parent_dir(parent))
    }

    /// Set the parent directory on the plugin and every declared resource.
    pub fn with_parent_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        for resource in &mut self.resources {
            resource.parent_dir = dir.clone();
        }
        self.parent_dir = dir;
        self
    }

    /// The root resource, if the plugin declares a root response.
    pub fn root_resource(&self) -> Option<ResourceConfig> {
        self.response.as_ref().map(|response| ResourceConfig {
            name: Some("root".to_string()),
            path: self.path.clone(),
            response: response.clone(),
            parent_dir: self.parent_dir.clone(),
            ..Default::default()
        })
    }

    /// Directory a resource's relative files resolve against. Resources
    /// without their own directory use the plugin's.
    pub fn resource_dir<'a>(&'a self, resource: &'a ResourceConfig) -> &'a Path {
        if resource.parent_dir.as_os_str().is_empty() {
            &self.parent_dir
        } else {
            &resource.parent_dir
        }
    }

    pub fn resolve_resource_path(&self, resource: &ResourceConfig, relative: &str) -> PathBuf {
        resolve_against(self.resource_dir(resource), relative)
    }

    /// Load-time checks that do not need a script engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for resource in self.resources.iter().chain(self.root_resource().iter()) {
            if let Some(delay) = &resource.response.delay {
                delay.validate()?;
            }
            if let Some(script) = &resource.response.script_file {
                let full = self.resolve_resource_path(resource, script);
                if !full.is_file() {
                    return Err(ConfigError::ScriptNotFound {
                        resource: resource.describe(),
                        path: full,
                    });
                }
            }
        }
        Ok(())
    }
}

fn resolve_against(dir: &Path, relative: &str) -> PathBuf {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        dir.join(candidate)
    }
}
