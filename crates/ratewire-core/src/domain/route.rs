//! Route templates and major-parameter scopes
//!
//! Bucket discovery is keyed on the *generic* shape of an endpoint
//! (`/channels/:channel_id/messages`), never on the concrete URL. The only
//! concrete identifiers that partition a bucket further are the major
//! parameters, extracted here into a [`ScopeKey`].

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::DomainError;
use super::request::HttpMethod;

/// Placeholder name for the guild major parameter
pub const GUILD_PARAM: &str = "guild_id";
/// Placeholder name for the channel major parameter
pub const CHANNEL_PARAM: &str = "channel_id";
/// Placeholder name for the webhook major parameter
pub const WEBHOOK_PARAM: &str = "webhook_id";

// ============================================================================
// RouteTemplate
// ============================================================================

/// The generic, parameterized shape of an endpoint.
///
/// Placeholders are written either as `:name` or `{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTemplate(String);

impl RouteTemplate {
    /// Create a route template, validating that it is an absolute path.
    pub fn new(template: impl Into<String>) -> Result<Self, DomainError> {
        let template = template.into();
        let trimmed = template.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidRoute(template));
        }
        if !trimmed.starts_with('/') {
            return Err(DomainError::InvalidRoute(format!(
                "{trimmed} (must start with '/')"
            )));
        }
        if trimmed.contains('?') || trimmed.contains("://") {
            return Err(DomainError::InvalidRoute(format!(
                "{trimmed} (must be a bare path)"
            )));
        }
        Ok(Self(trimmed.trim_end_matches('/').to_string()))
    }

    /// Get the template as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Non-empty path segments of the template
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Names of every placeholder in the template, in order
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments().filter_map(placeholder_name)
    }
}

impl Display for RouteTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RouteTemplate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Returns the placeholder name if `segment` is `:name` or `{name}`.
fn placeholder_name(segment: &str) -> Option<&str> {
    if let Some(name) = segment.strip_prefix(':') {
        return (!name.is_empty()).then_some(name);
    }
    segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}

// ============================================================================
// RouteKey
// ============================================================================

/// Key used by the route registry: HTTP method plus route template.
///
/// The server assigns buckets per method, so `GET` and `POST` on the same
/// template are distinct routes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

impl RouteKey {
    /// Build the key for `method` on `template`
    #[must_use]
    pub fn new(method: HttpMethod, template: &RouteTemplate) -> Self {
        Self(format!("{} {}", method.as_str(), template.as_str()))
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RouteKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ScopeKey
// ============================================================================

/// Major-parameter tuple partitioning a bucket hash.
///
/// Two requests sharing a hash but differing in any of these values are
/// rate limited independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub webhook_id: Option<String>,
}

impl ScopeKey {
    /// A scope with no major parameters
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// True when no major parameter is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guild_id.is_none() && self.channel_id.is_none() && self.webhook_id.is_none()
    }

    /// Extract the major parameters by aligning `template` with `url`.
    ///
    /// `url` may be absolute or a bare path and may carry a base prefix
    /// (`/api/v10`) the template omits; segments are aligned from the end.
    /// A URL shorter than the template yields an empty scope.
    #[must_use]
    pub fn from_route(template: &RouteTemplate, url: &str) -> Self {
        if !template.placeholders().any(is_major_param) {
            return Self::none();
        }
        let path = url_path(url);
        let url_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let template_segments: Vec<&str> = template.segments().collect();

        if url_segments.len() < template_segments.len() {
            return Self::none();
        }
        let offset = url_segments.len() - template_segments.len();

        let mut scope = Self::none();
        for (index, segment) in template_segments.iter().enumerate() {
            let Some(name) = placeholder_name(segment) else {
                continue;
            };
            let value = url_segments[offset + index].to_string();
            match name {
                GUILD_PARAM => scope.guild_id = Some(value),
                CHANNEL_PARAM => scope.channel_id = Some(value),
                WEBHOOK_PARAM => scope.webhook_id = Some(value),
                _ => {}
            }
        }
        scope
    }

    /// Derive the bucket identity `hash:guild:channel:webhook` for `hash`.
    #[must_use]
    pub fn bucket_id(&self, hash: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            hash,
            self.guild_id.as_deref().unwrap_or(""),
            self.channel_id.as_deref().unwrap_or(""),
            self.webhook_id.as_deref().unwrap_or("")
        )
    }
}

fn is_major_param(name: &str) -> bool {
    matches!(name, GUILD_PARAM | CHANNEL_PARAM | WEBHOOK_PARAM)
}

/// Base that bare paths are resolved against before taking their path
const RELATIVE_BASE: &str = "http://relative.invalid/";

/// Path component of `url`, which may be absolute or a bare path.
fn url_path(url: &str) -> String {
    Url::parse(url)
        .or_else(|_| Url::parse(RELATIVE_BASE).and_then(|base| base.join(url)))
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_default()
}
