//! Resource matching.
//!
//! Plugin resources are compiled once (path templates parsed, regexes and
//! JSONPath expressions built) and then matched against each request in
//! declaration order:
//!
//! 1. method (a resource without a method only matches GET)
//! 2. path (literal segments, `{name}` parameters, trailing `*`)
//! 3. content type, when the resource declares one
//! 4. every query, header, path-param and body predicate
//!
//! The first resource passing all checks wins. When none does, the plugin's
//! root resource is used if its path (when set) matches.

use crate::config::{MatchOperator, PluginConfig, RequestBodyConfig, ResourceConfig, ValueMatch};
use crate::error::ConfigError;
use crate::hooks::RouteSummary;
use crate::http::{HttpMethod, MockRequest};
use regex::Regex;
use serde_json::Value;
use serde_json_path::JsonPath;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    /// Trailing `*`: matches zero or more remaining segments
    Wildcard,
}

/// A parsed resource path such as `/pets/{petId}/photos/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if !raw.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let parts: Vec<&str> = split_path(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                if i + 1 != parts.len() {
                    return Err(invalid("'*' is only allowed as the last segment"));
                }
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() || name.contains(['{', '}']) {
                    return Err(invalid("empty or malformed path parameter"));
                }
                Segment::Param(name.to_string())
            } else if part.contains(['{', '}']) {
                return Err(invalid("path parameters must span a whole segment"));
            } else {
                Segment::Literal((*part).to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn has_params(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Param(_)))
    }

    /// Match a request path, returning captured parameters (URL-decoded).
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut actual = split_path(path);

        for segment in &self.segments {
            match segment {
                Segment::Wildcard => return Some(params),
                Segment::Literal(expected) => {
                    if actual.next()? != expected {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = actual.next()?;
                    let decoded = urlencoding::decode(value)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| value.to_string());
                    params.insert(name.clone(), decoded);
                }
            }
        }

        actual.next().is_none().then_some(params)
    }
}

/// A compiled value predicate for query params, headers or path params.
#[derive(Debug, Clone)]
pub struct CompiledValueMatch {
    operator: MatchOperator,
    value: String,
    regex: Option<Arc<Regex>>,
}

impl CompiledValueMatch {
    pub fn compile(
        resource: &str,
        field: &str,
        operator: MatchOperator,
        value: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let needs_value = !matches!(operator, MatchOperator::Exists | MatchOperator::NotExists);
        let value = match value {
            Some(v) => v.to_string(),
            None if needs_value => {
                return Err(ConfigError::InvalidPredicate {
                    resource: resource.to_string(),
                    reason: format!("predicate on '{field}' needs a value for {operator:?}"),
                })
            }
            None => String::new(),
        };

        let regex = match operator {
            MatchOperator::Matches | MatchOperator::NotMatches => {
                // Whole-value match, like the other equality operators.
                let regex = Regex::new(&format!("^(?:{value})$")).map_err(|e| {
                    ConfigError::InvalidPredicate {
                        resource: resource.to_string(),
                        reason: format!("invalid regex for '{field}': {e}"),
                    }
                })?;
                Some(Arc::new(regex))
            }
            _ => None,
        };

        Ok(Self {
            operator,
            value,
            regex,
        })
    }

    fn from_config(resource: &str, field: &str, config: &ValueMatch) -> Result<Self, ConfigError> {
        Self::compile(resource, field, config.operator(), config.value())
    }

    /// `actual` is `None` when the field is absent from the request.
    pub fn matches(&self, actual: Option<&str>) -> bool {
        let regex_match = |v: &str| self.regex.as_ref().is_some_and(|r| r.is_match(v));
        match self.operator {
            MatchOperator::Exists => actual.is_some(),
            MatchOperator::NotExists => actual.is_none(),
            MatchOperator::EqualTo => actual == Some(self.value.as_str()),
            MatchOperator::NotEqualTo => actual != Some(self.value.as_str()),
            MatchOperator::Contains => actual.is_some_and(|v| v.contains(&self.value)),
            MatchOperator::NotContains => !actual.is_some_and(|v| v.contains(&self.value)),
            MatchOperator::Matches => actual.is_some_and(regex_match),
            MatchOperator::NotMatches => !actual.is_some_and(regex_match),
        }
    }
}

/// Request body predicate, optionally narrowed with a JSONPath query.
#[derive(Debug, Clone)]
pub struct CompiledBodyMatch {
    json_path: Option<JsonPath>,
    matcher: CompiledValueMatch,
}

impl CompiledBodyMatch {
    pub fn compile(resource: &str, config: &RequestBodyConfig) -> Result<Self, ConfigError> {
        let json_path = config
            .json_path
            .as_deref()
            .map(|expr| {
                JsonPath::parse(expr).map_err(|e| ConfigError::InvalidPredicate {
                    resource: resource.to_string(),
                    reason: format!("invalid JSONPath '{expr}': {e}"),
                })
            })
            .transpose()?;
        let matcher =
            CompiledValueMatch::compile(resource, "body", config.operator, config.value.as_deref())?;
        Ok(Self { json_path, matcher })
    }

    pub fn matches(&self, body: &str) -> bool {
        match &self.json_path {
            None => {
                let actual = (!body.is_empty()).then_some(body);
                self.matcher.matches(actual)
            }
            Some(path) => {
                let extracted = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|json| path.query(&json).first().map(node_text));
                self.matcher.matches(extracted.as_deref())
            }
        }
    }
}

/// Scalars as their natural text, containers as compact JSON.
fn node_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Media type without parameters, lower-cased.
fn media_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

fn accepts(accept: &str, content_type: &str) -> bool {
    let (wanted_type, _) = content_type.split_once('/').unwrap_or((content_type, ""));
    accept.split(',').map(media_type).any(|range| {
        range == "*/*"
            || range == content_type
            || range
                .strip_suffix("/*")
                .is_some_and(|major| major == wanted_type)
    })
}

/// A resource ready to be matched.
#[derive(Debug, Clone)]
pub struct CompiledResource {
    resource: Arc<ResourceConfig>,
    template: Option<PathTemplate>,
    method: HttpMethod,
    content_type: Option<String>,
    query: Vec<(String, CompiledValueMatch)>,
    headers: Vec<(String, CompiledValueMatch)>,
    path_params: Vec<(String, CompiledValueMatch)>,
    body: Option<CompiledBodyMatch>,
    is_root: bool,
}

impl CompiledResource {
    pub fn compile(resource: &ResourceConfig) -> Result<Self, ConfigError> {
        let label = resource.describe();
        let path = resource.path.as_deref().ok_or_else(|| ConfigError::InvalidPath {
            path: String::new(),
            reason: format!("resource '{label}' has no path"),
        })?;
        let template = PathTemplate::parse(path)?;

        let compile_all = |predicates: &std::collections::BTreeMap<String, ValueMatch>| {
            predicates
                .iter()
                .map(|(name, config)| {
                    CompiledValueMatch::from_config(&label, name, config).map(|m| (name.clone(), m))
                })
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(Self {
            template: Some(template),
            method: resource.effective_method(),
            content_type: resource.content_type.as_deref().map(media_type),
            query: compile_all(&resource.query_params)?,
            headers: compile_all(&resource.request_headers)?,
            path_params: compile_all(&resource.path_params)?,
            body: resource
                .request_body
                .as_ref()
                .map(|b| CompiledBodyMatch::compile(&label, b))
                .transpose()?,
            resource: Arc::new(resource.clone()),
            is_root: false,
        })
    }

    /// The root resource only constrains the path, and only when one is set.
    pub fn compile_root(resource: &ResourceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            template: resource.path.as_deref().map(PathTemplate::parse).transpose()?,
            method: resource.effective_method(),
            content_type: None,
            query: Vec::new(),
            headers: Vec::new(),
            path_params: Vec::new(),
            body: None,
            resource: Arc::new(resource.clone()),
            is_root: true,
        })
    }

    pub fn resource(&self) -> &ResourceConfig {
        &self.resource
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    fn content_type_matches(&self, request: &MockRequest) -> bool {
        let Some(expected) = &self.content_type else {
            return true;
        };
        if let Some(sent) = request.header("content-type") {
            return media_type(sent) == *expected;
        }
        match request.header("accept") {
            Some(accept) => accepts(accept, expected),
            None => true,
        }
    }

    /// Path parameters when the request matches, `None` otherwise.
    pub fn matches(&self, request: &MockRequest) -> Option<HashMap<String, String>> {
        if !self.is_root && request.method != self.method {
            return None;
        }

        let params = match &self.template {
            Some(template) => template.matches(&request.path)?,
            None => HashMap::new(),
        };

        if !self.content_type_matches(request) {
            trace!("{}: content type mismatch", self.resource.describe());
            return None;
        }

        let all_match = self
            .query
            .iter()
            .all(|(name, m)| m.matches(request.query_param(name)))
            && self
                .headers
                .iter()
                .all(|(name, m)| m.matches(request.header(name)))
            && self
                .path_params
                .iter()
                .all(|(name, m)| m.matches(params.get(name).map(String::as_str)))
            && self
                .body
                .as_ref()
                .is_none_or(|b| b.matches(&request.body.as_text()));

        all_match.then_some(params)
    }
}

/// A successful match.
#[derive(Debug, Clone)]
pub struct MatchedResource<'a> {
    pub resource: &'a ResourceConfig,
    pub path_params: HashMap<String, String>,
    pub is_root: bool,
}

/// First match in declaration order. Pure: no state, no I/O beyond reading
/// the request body when a body predicate needs it.
pub fn match_resource<'a>(
    resources: &'a [CompiledResource],
    request: &MockRequest,
) -> Option<MatchedResource<'a>> {
    resources.iter().find_map(|compiled| {
        compiled.matches(request).map(|path_params| MatchedResource {
            resource: compiled.resource(),
            path_params,
            is_root: compiled.is_root,
        })
    })
}

/// One plugin's compiled resources plus its optional root resource.
#[derive(Debug, Clone)]
pub struct ResourceMatcher {
    plugin: Arc<PluginConfig>,
    resources: Vec<CompiledResource>,
    root: Option<CompiledResource>,
}

impl ResourceMatcher {
    pub fn new(plugin: PluginConfig) -> Result<Self, ConfigError> {
        let resources = plugin
            .resources
            .iter()
            .map(CompiledResource::compile)
            .collect::<Result<Vec<_>, _>>()?;
        let root = plugin
            .root_resource()
            .as_ref()
            .map(CompiledResource::compile_root)
            .transpose()?;

        Ok(Self {
            plugin: Arc::new(plugin),
            resources,
            root,
        })
    }

    pub fn plugin(&self) -> &PluginConfig {
        &self.plugin
    }

    pub fn resources(&self) -> &[CompiledResource] {
        &self.resources
    }

    /// Declared resources only.
    pub fn find_declared(&self, request: &MockRequest) -> Option<MatchedResource<'_>> {
        match_resource(&self.resources, request)
    }

    /// The root resource, if it applies to this request.
    pub fn find_root(&self, request: &MockRequest) -> Option<MatchedResource<'_>> {
        match_resource(self.root.as_slice(), request)
    }

    pub fn find(&self, request: &MockRequest) -> Option<MatchedResource<'_>> {
        self.find_declared(request)
            .or_else(|| self.find_root(request))
    }

    pub fn route_summaries(&self) -> Vec<RouteSummary> {
        self.resources
            .iter()
            .chain(self.root.iter())
            .map(|compiled| {
                let resource = compiled.resource();
                RouteSummary {
                    plugin: self.plugin.plugin.clone(),
                    method: compiled.method,
                    path: resource.path.clone(),
                    script_file: resource.response.script_file.clone(),
                    is_root: compiled.is_root,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseConfig;
    use std::collections::BTreeMap;

    fn resource(method: HttpMethod, path: &str, data: &str) -> ResourceConfig {
        ResourceConfig::new(method, path).with_response(ResponseConfig {
            static_data: Some(data.to_string()),
            ..Default::default()
        })
    }

    fn data_of(matched: &MatchedResource<'_>) -> String {
        matched
            .resource
            .response
            .static_data
            .clone()
            .unwrap_or_default()
    }

    #[test]
    fn test_path_template_literals_and_params() {
        let t = PathTemplate::parse("/pets/{petId}/photos").unwrap();
        assert!(t.has_params());
        let params = t.matches("/pets/42/photos").unwrap();
        assert_eq!(params.get("petId"), Some(&"42".to_string()));
        assert!(t.matches("/pets/42").is_none());
        assert!(t.matches("/pets/42/photos/1").is_none());
        assert!(t.matches("/dogs/42/photos").is_none());
    }

    #[test]
    fn test_path_template_trailing_slash_and_decoding() {
        let t = PathTemplate::parse("/users/{name}/").unwrap();
        let params = t.matches("/users/Jane%20Doe").unwrap();
        assert_eq!(params.get("name"), Some(&"Jane Doe".to_string()));
    }

    #[test]
    fn test_path_template_wildcard() {
        let t = PathTemplate::parse("/static/*").unwrap();
        assert!(t.matches("/static").is_some());
        assert!(t.matches("/static/css/site.css").is_some());
        assert!(t.matches("/other").is_none());

        let root = PathTemplate::parse("/*").unwrap();
        assert!(root.matches("/anything/at/all").is_some());
    }

    #[test]
    fn test_path_template_rejects_bad_patterns() {
        assert!(PathTemplate::parse("pets").is_err());
        assert!(PathTemplate::parse("/a/*/b").is_err());
        assert!(PathTemplate::parse("/pets/{}").is_err());
        assert!(PathTemplate::parse("/pets/id-{id}").is_err());
    }

    #[test]
    fn test_value_match_operators() {
        let c = |op, v: Option<&str>| CompiledValueMatch::compile("r", "f", op, v).unwrap();

        assert!(c(MatchOperator::EqualTo, Some("a")).matches(Some("a")));
        assert!(!c(MatchOperator::EqualTo, Some("a")).matches(None));
        assert!(c(MatchOperator::NotEqualTo, Some("a")).matches(None));
        assert!(c(MatchOperator::Contains, Some("ell")).matches(Some("hello")));
        assert!(c(MatchOperator::NotContains, Some("x")).matches(Some("hello")));
        assert!(c(MatchOperator::Matches, Some(r"\d+")).matches(Some("123")));
        assert!(!c(MatchOperator::Matches, Some(r"\d+")).matches(Some("a123")));
        assert!(c(MatchOperator::NotMatches, Some(r"\d+")).matches(Some("abc")));
        assert!(c(MatchOperator::Exists, None).matches(Some("")));
        assert!(c(MatchOperator::NotExists, None).matches(None));
    }

    #[test]
    fn test_value_match_config_errors() {
        assert!(matches!(
            CompiledValueMatch::compile("r", "f", MatchOperator::EqualTo, None),
            Err(ConfigError::InvalidPredicate { .. })
        ));
        assert!(matches!(
            CompiledValueMatch::compile("r", "f", MatchOperator::Matches, Some("(")),
            Err(ConfigError::InvalidPredicate { .. })
        ));
    }

    #[test]
    fn test_body_match_with_json_path() {
        let body = CompiledBodyMatch::compile(
            "r",
            &RequestBodyConfig {
                json_path: Some("$.pet.name".to_string()),
                value: Some("Rex".to_string()),
                operator: MatchOperator::EqualTo,
            },
        )
        .unwrap();
        assert!(body.matches(r#"{"pet":{"name":"Rex"}}"#));
        assert!(!body.matches(r#"{"pet":{"name":"Tom"}}"#));
        assert!(!body.matches("not json"));

        let bad = CompiledBodyMatch::compile(
            "r",
            &RequestBodyConfig {
                json_path: Some("$[".to_string()),
                value: Some("x".to_string()),
                operator: MatchOperator::EqualTo,
            },
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_body_match_without_json_path() {
        let body = CompiledBodyMatch::compile(
            "r",
            &RequestBodyConfig {
                json_path: None,
                value: Some("hello".to_string()),
                operator: MatchOperator::Contains,
            },
        )
        .unwrap();
        assert!(body.matches("well hello there"));
        assert!(!body.matches(""));
    }

    #[test]
    fn test_unset_method_matches_only_get() {
        let mut r = resource(HttpMethod::Get, "/pets", "[]");
        r.method = None;
        let compiled = CompiledResource::compile(&r).unwrap();
        assert!(compiled.matches(&MockRequest::new(HttpMethod::Get, "/pets")).is_some());
        assert!(compiled.matches(&MockRequest::new(HttpMethod::Post, "/pets")).is_none());
    }

    #[test]
    fn test_first_declared_match_wins() {
        let plugin = PluginConfig {
            resources: vec![
                resource(HttpMethod::Get, "/pets/{id}", "templated"),
                resource(HttpMethod::Get, "/pets/1", "exact"),
            ],
            ..Default::default()
        };
        let matcher = ResourceMatcher::new(plugin).unwrap();
        let matched = matcher
            .find(&MockRequest::new(HttpMethod::Get, "/pets/1"))
            .unwrap();
        assert_eq!(data_of(&matched), "templated");
        assert_eq!(matched.path_params.get("id"), Some(&"1".to_string()));
        assert!(!matched.is_root);
    }

    #[test]
    fn test_predicates_are_anded() {
        let mut r = resource(HttpMethod::Get, "/pets", "filtered");
        r.query_params
            .insert("type".to_string(), ValueMatch::Simple("cat".to_string()));
        r.request_headers.insert(
            "X-Api-Key".to_string(),
            ValueMatch::Detailed {
                value: None,
                operator: MatchOperator::Exists,
            },
        );
        let compiled = CompiledResource::compile(&r).unwrap();

        let both = MockRequest::new(HttpMethod::Get, "/pets?type=cat").with_header("x-api-key", "k");
        assert!(compiled.matches(&both).is_some());
        let query_only = MockRequest::new(HttpMethod::Get, "/pets?type=cat");
        assert!(compiled.matches(&query_only).is_none());
        let wrong_query = MockRequest::new(HttpMethod::Get, "/pets?type=dog").with_header("X-Api-Key", "k");
        assert!(compiled.matches(&wrong_query).is_none());
    }

    #[test]
    fn test_path_param_predicate() {
        let mut r = resource(HttpMethod::Get, "/orders/{id}", "numeric");
        let mut params = BTreeMap::new();
        params.insert(
            "id".to_string(),
            ValueMatch::Detailed {
                value: Some(r"\d+".to_string()),
                operator: MatchOperator::Matches,
            },
        );
        r.path_params = params;
        let compiled = CompiledResource::compile(&r).unwrap();
        assert!(compiled.matches(&MockRequest::new(HttpMethod::Get, "/orders/12")).is_some());
        assert!(compiled.matches(&MockRequest::new(HttpMethod::Get, "/orders/ab")).is_none());
    }

    #[test]
    fn test_content_type_negotiation() {
        let mut r = resource(HttpMethod::Post, "/pets", "json");
        r.content_type = Some("application/json".to_string());
        let compiled = CompiledResource::compile(&r).unwrap();

        let json = MockRequest::new(HttpMethod::Post, "/pets")
            .with_header("Content-Type", "application/json; charset=utf-8");
        assert!(compiled.matches(&json).is_some());

        let xml = MockRequest::new(HttpMethod::Post, "/pets").with_header("Content-Type", "text/xml");
        assert!(compiled.matches(&xml).is_none());

        let accept_any = MockRequest::new(HttpMethod::Post, "/pets").with_header("Accept", "*/*");
        assert!(compiled.matches(&accept_any).is_some());
        let accept_family =
            MockRequest::new(HttpMethod::Post, "/pets").with_header("Accept", "text/html, application/*;q=0.8");
        assert!(compiled.matches(&accept_family).is_some());
        let accept_html = MockRequest::new(HttpMethod::Post, "/pets").with_header("Accept", "text/html");
        assert!(compiled.matches(&accept_html).is_none());

        let neither = MockRequest::new(HttpMethod::Post, "/pets");
        assert!(compiled.matches(&neither).is_some());
    }

    #[test]
    fn test_root_fallback() {
        let plugin = PluginConfig {
            path: Some("/api/*".to_string()),
            response: Some(ResponseConfig {
                static_data: Some("root".to_string()),
                ..Default::default()
            }),
            resources: vec![resource(HttpMethod::Get, "/api/pets", "pets")],
            ..Default::default()
        };
        let matcher = ResourceMatcher::new(plugin).unwrap();

        let declared = matcher.find(&MockRequest::new(HttpMethod::Get, "/api/pets")).unwrap();
        assert_eq!(data_of(&declared), "pets");

        let fallback = matcher
            .find(&MockRequest::new(HttpMethod::Delete, "/api/owners"))
            .unwrap();
        assert!(fallback.is_root);
        assert_eq!(data_of(&fallback), "root");

        assert!(matcher.find(&MockRequest::new(HttpMethod::Get, "/other")).is_none());
    }

    #[test]
    fn test_root_without_path_matches_anything() {
        let plugin = PluginConfig {
            response: Some(ResponseConfig::default()),
            ..Default::default()
        };
        let matcher = ResourceMatcher::new(plugin).unwrap();
        assert!(matcher
            .find(&MockRequest::new(HttpMethod::Patch, "/x/y"))
            .is_some_and(|m| m.is_root));
    }

    #[test]
    fn test_no_match_without_root() {
        let plugin = PluginConfig {
            resources: vec![resource(HttpMethod::Get, "/pets", "[]")],
            ..Default::default()
        };
        let matcher = ResourceMatcher::new(plugin).unwrap();
        assert!(matcher.find(&MockRequest::new(HttpMethod::Get, "/owners")).is_none());
    }

    #[test]
    fn test_invalid_resource_fails_compilation() {
        let plugin = PluginConfig {
            resources: vec![resource(HttpMethod::Get, "no-slash", "")],
            ..Default::default()
        };
        assert!(matches!(
            ResourceMatcher::new(plugin),
            Err(ConfigError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_route_summaries_include_root() {
        let plugin = PluginConfig {
            plugin: Some("rest".to_string()),
            response: Some(ResponseConfig::default()),
            resources: vec![resource(HttpMethod::Put, "/pets", "")],
            ..Default::default()
        };
        let summaries = ResourceMatcher::new(plugin).unwrap().route_summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].method, HttpMethod::Put);
        assert_eq!(summaries[0].plugin.as_deref(), Some("rest"));
        assert!(summaries[1].is_root);
        assert!(summaries[1].path.is_none());
    }
}
