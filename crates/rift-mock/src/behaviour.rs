//! Response behaviour: the per-request outcome of matching and scripting.
//!
//! A behaviour starts unconfigured and moves exactly once to either
//! [`BehaviourType::DefaultBehaviour`] or [`BehaviourType::ImmediateResponse`].
//! Declarative config and script code both write through
//! [`MutableResponseBehaviour`]; the rendering layer only reads through
//! [`ReadResponseBehaviour`].

use crate::config::ResponseConfig;
use crate::error::{BehaviourError, ConfigError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the rendering layer should treat a resolved behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BehaviourType {
    /// Defer to the plugin's rendering (file, data, example)
    DefaultBehaviour,
    /// Short-circuit with the status code and headers only
    ImmediateResponse,
}

impl BehaviourType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviourType::DefaultBehaviour => "DEFAULT_BEHAVIOUR",
            BehaviourType::ImmediateResponse => "IMMEDIATE_RESPONSE",
        }
    }
}

impl fmt::Display for BehaviourType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulated latency before the response is sent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PerformanceSimulation {
    /// Fixed delay in milliseconds
    Fixed(u64),
    /// Fixed delay in milliseconds: `{ exact: 500 }`
    Exact { exact: u64 },
    /// Uniformly random delay within an inclusive range
    Range { min: u64, max: u64 },
}

impl PerformanceSimulation {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            PerformanceSimulation::Range { min, max } if min > max => Err(
                ConfigError::InvalidDelay(format!("min ({min}ms) is greater than max ({max}ms)")),
            ),
            _ => Ok(()),
        }
    }

    /// Delay to apply for one response.
    pub fn effective_delay(&self) -> Duration {
        let ms = match self {
            PerformanceSimulation::Fixed(ms) | PerformanceSimulation::Exact { exact: ms } => *ms,
            PerformanceSimulation::Range { min, max } if min >= max => *min,
            PerformanceSimulation::Range { min, max } => rand::thread_rng().gen_range(*min..=*max),
        };
        Duration::from_millis(ms)
    }

    /// Sleep for [`PerformanceSimulation::effective_delay`].
    pub async fn simulate(&self) {
        let delay = self.effective_delay();
        if !delay.is_zero() {
            tracing::debug!("Simulating response latency of {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Read-only view handed to the rendering layer.
pub trait ReadResponseBehaviour {
    fn status_code(&self) -> u16;
    /// The configured type, or `DefaultBehaviour` while still unconfigured.
    fn behaviour_type(&self) -> BehaviourType;
    fn is_configured(&self) -> bool;
    fn response_file(&self) -> Option<&str>;
    fn response_data(&self) -> Option<&str>;
    fn is_template(&self) -> bool;
    fn example_name(&self) -> Option<&str>;
    /// Headers in insertion order, names as set.
    fn response_headers(&self) -> &[(String, String)];
    fn performance_simulation(&self) -> Option<&PerformanceSimulation>;

    /// Case-insensitive header lookup.
    fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Mutation contract used by config defaults and script bindings.
pub trait MutableResponseBehaviour {
    fn with_status_code(&mut self, status_code: u16) -> &mut Self;
    fn with_file(&mut self, path: impl Into<String>) -> &mut Self;
    fn with_data(&mut self, data: impl Into<String>) -> &mut Self;
    /// `None` removes every header with this name.
    fn with_header(&mut self, name: &str, value: Option<&str>) -> &mut Self;
    /// Clear the file reference and any inline data: the response body is empty.
    fn with_empty(&mut self) -> &mut Self;
    fn template(&mut self) -> &mut Self;
    fn with_example_name(&mut self, name: impl Into<String>) -> &mut Self;
    fn with_performance(&mut self, simulation: PerformanceSimulation) -> &mut Self;
    fn using_default_behaviour(&mut self) -> Result<&mut Self, BehaviourError>;
    fn immediately(&mut self) -> Result<&mut Self, BehaviourError>;

    fn skip_default_behaviour(&mut self) -> Result<&mut Self, BehaviourError> {
        self.immediately()
    }

    fn with_delay(&mut self, ms: u64) -> &mut Self {
        self.with_performance(PerformanceSimulation::Fixed(ms))
    }

    fn with_delay_range(&mut self, min: u64, max: u64) -> &mut Self {
        self.with_performance(PerformanceSimulation::Range { min, max })
    }

    fn respond(&mut self) -> &mut Self {
        self
    }

    fn and(&mut self) -> &mut Self {
        self
    }
}

/// The single concrete behaviour type. Created per request and owned by the
/// request handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBehaviour {
    status_code: u16,
    behaviour_type: Option<BehaviourType>,
    response_file: Option<String>,
    response_data: Option<String>,
    template: bool,
    example_name: Option<String>,
    headers: Vec<(String, String)>,
    performance_simulation: Option<PerformanceSimulation>,
    /// Set once a file, data or empty body was chosen explicitly.
    #[serde(skip)]
    content_set: bool,
}

impl Default for ResponseBehaviour {
    fn default() -> Self {
        Self {
            status_code: 200,
            behaviour_type: None,
            response_file: None,
            response_data: None,
            template: false,
            example_name: None,
            headers: Vec::new(),
            performance_simulation: None,
            content_set: false,
        }
    }
}

impl ResponseBehaviour {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviour pre-populated with the status code and headers of a
    /// response config, not yet configured. This is what scripts receive.
    pub fn from_response_config(config: &ResponseConfig) -> Self {
        let mut behaviour = Self::new();
        behaviour.with_status_code(config.effective_status_code());
        for (name, value) in &config.headers {
            behaviour.with_header(name, Some(value));
        }
        behaviour
    }

    /// Fill in the body-related fields the script left untouched.
    pub fn apply_config_defaults(&mut self, config: &ResponseConfig) -> &mut Self {
        if !self.content_set {
            self.response_file = config.static_file.clone();
            self.response_data = config.static_data.clone();
        }
        if config.template {
            self.template = true;
        }
        if self.example_name.is_none() {
            self.example_name = config.example_name.clone();
        }
        if self.performance_simulation.is_none() {
            self.performance_simulation = config.delay.clone();
        }
        self
    }

    /// Status code from script input, rejecting values outside 100..=999.
    pub fn try_with_status_code(&mut self, code: i64) -> Result<&mut Self, BehaviourError> {
        match u16::try_from(code) {
            Ok(status) if (100..=999).contains(&status) => Ok(self.with_status_code(status)),
            _ => Err(BehaviourError::InvalidStatusCode(code)),
        }
    }

    fn configure(
        &mut self,
        target: BehaviourType,
    ) -> Result<&mut Self, BehaviourError> {
        if let Some(current) = self.behaviour_type {
            return Err(BehaviourError::AlreadyConfigured {
                current: current.as_str(),
                attempted: target.as_str(),
            });
        }
        self.behaviour_type = Some(target);
        Ok(self)
    }
}

impl ReadResponseBehaviour for ResponseBehaviour {
    fn status_code(&self) -> u16 {
        self.status_code
    }

    fn behaviour_type(&self) -> BehaviourType {
        self.behaviour_type
            .unwrap_or(BehaviourType::DefaultBehaviour)
    }

    fn is_configured(&self) -> bool {
        self.behaviour_type.is_some()
    }

    fn response_file(&self) -> Option<&str> {
        self.response_file.as_deref()
    }

    fn response_data(&self) -> Option<&str> {
        self.response_data.as_deref()
    }

    fn is_template(&self) -> bool {
        self.template
    }

    fn example_name(&self) -> Option<&str> {
        self.example_name.as_deref()
    }

    fn response_headers(&self) -> &[(String, String)] {
        &self.headers
    }

    fn performance_simulation(&self) -> Option<&PerformanceSimulation> {
        self.performance_simulation.as_ref()
    }
}

impl MutableResponseBehaviour for ResponseBehaviour {
    fn with_status_code(&mut self, status_code: u16) -> &mut Self {
        self.status_code = status_code;
        self
    }

    fn with_file(&mut self, path: impl Into<String>) -> &mut Self {
        self.response_file = Some(path.into());
        self.content_set = true;
        self
    }

    fn with_data(&mut self, data: impl Into<String>) -> &mut Self {
        self.response_data = Some(data.into());
        self.content_set = true;
        self
    }

    fn with_header(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        match value {
            None => self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name)),
            Some(value) => {
                match self
                    .headers
                    .iter_mut()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                {
                    Some(existing) => existing.1 = value.to_string(),
                    None => self.headers.push((name.to_string(), value.to_string())),
                }
            }
        }
        self
    }

    fn with_empty(&mut self) -> &mut Self {
        self.response_file = None;
        self.response_data = None;
        self.content_set = true;
        self
    }

    fn template(&mut self) -> &mut Self {
        self.template = true;
        self
    }

    fn with_example_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.example_name = Some(name.into());
        self
    }

    fn with_performance(&mut self, simulation: PerformanceSimulation) -> &mut Self {
        self.performance_simulation = Some(simulation);
        self
    }

    fn using_default_behaviour(&mut self) -> Result<&mut Self, BehaviourError> {
        self.configure(BehaviourType::DefaultBehaviour)
    }

    fn immediately(&mut self) -> Result<&mut Self, BehaviourError> {
        self.configure(BehaviourType::ImmediateResponse)
    }
}
