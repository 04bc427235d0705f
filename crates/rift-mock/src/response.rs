//! Minimal rendering of a resolved behaviour into status, headers and body.
//!
//! Immediate responses carry no body. Default responses use inline data,
//! else the response file read relative to the plugin directory, else an
//! empty body. Template expansion and example lookup belong to the plugins
//! and are not applied here.

use crate::behaviour::{BehaviourType, PerformanceSimulation, ReadResponseBehaviour};
use crate::engine::{Resolution, ResolvedResponse};
use crate::error::ResolveError;
use bytes::Bytes;
use serde_json::json;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub delay: Option<PerformanceSimulation>,
}

impl RenderedResponse {
    fn plain(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: Bytes::from(body.to_string()),
            delay: None,
        }
    }

    pub fn render(resolved: &ResolvedResponse) -> Result<Self, ResolveError> {
        let behaviour = &resolved.behaviour;
        let body = match behaviour.behaviour_type() {
            BehaviourType::ImmediateResponse => Bytes::new(),
            BehaviourType::DefaultBehaviour => {
                if behaviour.is_template() {
                    debug!("Template rendering is left to the plugin for {}", resolved.resource);
                }
                match (behaviour.response_data(), behaviour.response_file()) {
                    (Some(data), _) => Bytes::from(data.to_string()),
                    (None, Some(file)) => read_response_file(&resolved.base_dir, file)?,
                    (None, None) => Bytes::new(),
                }
            }
        };

        Ok(Self {
            status: behaviour.status_code(),
            headers: behaviour.response_headers().to_vec(),
            body,
            delay: behaviour.performance_simulation().cloned(),
        })
    }

    pub fn not_found() -> Self {
        Self::plain(404, "No resource matched the request")
    }

    pub fn rejected() -> Self {
        Self::plain(403, "Request rejected")
    }

    pub fn from_error(error: &ResolveError) -> Self {
        Self::plain(error.status_code(), &error.to_string())
    }

    /// Map any resolution outcome to a response; failures become 500s.
    pub fn from_outcome(outcome: Result<Resolution, ResolveError>) -> Self {
        let rendered = match outcome {
            Ok(Resolution::Matched(resolved)) => Self::render(&resolved),
            Ok(Resolution::NotFound) => Ok(Self::not_found()),
            Ok(Resolution::Rejected) => Ok(Self::rejected()),
            Err(e) => Err(e),
        };
        rendered.unwrap_or_else(|e| Self::from_error(&e))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Sleep for the configured performance simulation, if any.
    pub async fn simulate_delay(&self) {
        if let Some(delay) = &self.delay {
            delay.simulate().await;
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "status": self.status,
            "headers": self.headers,
            "body": self.body_text(),
        })
    }
}

fn read_response_file(base_dir: &Path, file: &str) -> Result<Bytes, ResolveError> {
    let path = {
        let candidate = Path::new(file);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            base_dir.join(candidate)
        }
    };
    std::fs::read(&path)
        .map(Bytes::from)
        .map_err(|source| ResolveError::ResponseFile { path, source })
}
