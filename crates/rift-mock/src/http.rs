//! Request model handed to the resolution engine by the HTTP layer.

use crate::error::ConfigError;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// HTTP methods a resource can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "CONNECT" => Ok(HttpMethod::Connect),
            "OPTIONS" => Ok(HttpMethod::Options),
            "TRACE" => Ok(HttpMethod::Trace),
            "PATCH" => Ok(HttpMethod::Patch),
            _ => Err(ConfigError::InvalidMethod(s.to_string())),
        }
    }
}

type BodyLoader = Box<dyn FnOnce() -> Bytes + Send>;

/// Request body that is only materialised when something reads it.
///
/// Most resources never look at the body, so the HTTP layer can hand over a
/// loader instead of buffering up front.
#[derive(Clone)]
pub struct LazyBody {
    loader: Arc<parking_lot::Mutex<Option<BodyLoader>>>,
    value: Arc<OnceCell<Bytes>>,
}

impl LazyBody {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let body = Self::deferred(Bytes::new);
        let _ = body.value.set(bytes.into());
        body
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    pub fn deferred<F>(loader: F) -> Self
    where
        F: FnOnce() -> Bytes + Send + 'static,
    {
        Self {
            loader: Arc::new(parking_lot::Mutex::new(Some(Box::new(loader)))),
            value: Arc::new(OnceCell::new()),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        self.value.get_or_init(|| match self.loader.lock().take() {
            Some(load) => load(),
            None => Bytes::new(),
        })
    }

    /// Body decoded as UTF-8, lossy.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(self.bytes()).into_owned()
    }

    pub fn is_loaded(&self) -> bool {
        self.value.get().is_some()
    }
}

impl Default for LazyBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for LazyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.get() {
            Some(bytes) => write!(f, "LazyBody({} bytes)", bytes.len()),
            None => f.write_str("LazyBody(<deferred>)"),
        }
    }
}

/// Inbound request as seen by the resolution engine.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    pub method: HttpMethod,
    /// Absolute request URI, e.g. `http://localhost:8080/pets?limit=1`.
    pub uri: String,
    pub path: String,
    /// Header names as received; lookups go through [`MockRequest::header`].
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: LazyBody,
}

impl MockRequest {
    pub fn new(method: HttpMethod, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path_and_query, None),
        };
        Self {
            method,
            uri: format!("http://localhost{path_and_query}"),
            path: path.to_string(),
            headers: HashMap::new(),
            query: query.map(parse_query_string).unwrap_or_default(),
            body: LazyBody::empty(),
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = LazyBody::from_bytes(body);
        self
    }

    pub fn with_lazy_body(mut self, body: LazyBody) -> Self {
        self.body = body;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Case-insensitive query parameter lookup.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a query string, URL-decoding both keys and values.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Lower-case every key of a map, keeping the last value on collision.
pub fn lowercase_keys(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect()
}
