//! Request descriptors
//!
//! A [`RequestDescriptor`] is everything an endpoint method hands to the
//! REST core: the generic route, the method, the concrete URL, optional
//! headers and body, and the two rate-limit exemption flags. It is built
//! once and never mutated while the request is in flight.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::route::{RouteKey, RouteTemplate, ScopeKey};

// ============================================================================
// HttpMethod
// ============================================================================

/// HTTP methods understood by the REST core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Canonical upper-case name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(DomainError::ValidationFailed(format!(
                "unsupported HTTP method '{other}'"
            ))),
        }
    }
}

// ============================================================================
// Body
// ============================================================================

/// A file uploaded as one part of a multipart request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    /// File name reported to the server
    pub file_name: String,
    /// MIME type; the transport falls back to `application/octet-stream`
    pub content_type: Option<String>,
    /// Raw file contents
    pub data: Vec<u8>,
}

impl FileAttachment {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Request payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Raw JSON text, sent as `application/json`
    Json(String),
    /// One part per file plus an optional `payload_json` part
    Multipart {
        payload_json: Option<String>,
        files: Vec<FileAttachment>,
    },
}

// ============================================================================
// RequestDescriptor
// ============================================================================

/// Immutable description of one logical request
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: HttpMethod,
    route: RouteTemplate,
    url: String,
    scope: ScopeKey,
    headers: Vec<(String, String)>,
    body: RequestBody,
    exempt_from_global_limit: bool,
    exempt_from_all_limits: bool,
}

impl RequestDescriptor {
    /// Describe a request to `url` shaped like `route`.
    ///
    /// The major-parameter scope is derived from the route and URL; use
    /// [`with_scope`](Self::with_scope) to override it.
    pub fn new(
        method: HttpMethod,
        route: RouteTemplate,
        url: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(DomainError::InvalidUrl(url));
        }
        if url.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidUrl(format!("{url} (contains whitespace)")));
        }
        let scope = ScopeKey::from_route(&route, &url);
        Ok(Self {
            method,
            route,
            url,
            scope,
            headers: Vec::new(),
            body: RequestBody::Empty,
            exempt_from_global_limit: false,
            exempt_from_all_limits: false,
        })
    }

    /// Add a request header. Values containing line breaks are rejected.
    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
            return Err(DomainError::InvalidHeader {
                name,
                reason: "not a valid header name".into(),
            });
        }
        if value.contains(['\r', '\n']) {
            return Err(DomainError::InvalidHeader {
                name,
                reason: "value contains a line break".into(),
            });
        }
        self.headers.push((name, value));
        Ok(self)
    }

    /// Attach raw JSON text as the body
    pub fn with_json_body(mut self, json: impl Into<String>) -> Self {
        self.body = RequestBody::Json(json.into());
        self
    }

    /// Serialize `value` as the JSON body
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, DomainError> {
        let json =
            serde_json::to_string(value).map_err(|e| DomainError::InvalidBody(e.to_string()))?;
        Ok(self.with_json_body(json))
    }

    /// Attach files, sent as multipart with an optional `payload_json` part
    pub fn with_files(mut self, payload_json: Option<String>, files: Vec<FileAttachment>) -> Self {
        self.body = RequestBody::Multipart {
            payload_json,
            files,
        };
        self
    }

    /// Override the derived major-parameter scope
    pub fn with_scope(mut self, scope: ScopeKey) -> Self {
        self.scope = scope;
        self
    }

    /// Skip the global limiter (the route bucket still applies)
    pub fn exempt_from_global_limit(mut self) -> Self {
        self.exempt_from_global_limit = true;
        self
    }

    /// Skip every limit; used for diagnostics that must never be throttled
    pub fn exempt_from_all_limits(mut self) -> Self {
        self.exempt_from_all_limits = true;
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn route(&self) -> &RouteTemplate {
        &self.route
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn is_exempt_from_global_limit(&self) -> bool {
        self.exempt_from_global_limit
    }

    pub fn is_exempt_from_all_limits(&self) -> bool {
        self.exempt_from_all_limits
    }

    /// Registry key for this request's route
    #[must_use]
    pub fn route_key(&self) -> RouteKey {
        RouteKey::new(self.method, &self.route)
    }
}
