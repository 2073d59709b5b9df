//! Response records and status classification

use std::fmt;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::headers;

/// What came back from one wire attempt
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ResponseRecord {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Closed set of outcomes a final status code maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 400 and 405
    BadRequest,
    /// 401 and 403
    Unauthorized,
    NotFound,
    PayloadTooLarge,
    RateLimited { global: bool },
    ServerError,
    Unexpected,
}

impl StatusClass {
    pub fn classify(status: StatusCode, headers: &HeaderMap) -> Self {
        match status.as_u16() {
            200..=299 => StatusClass::Success,
            400 | 405 => StatusClass::BadRequest,
            401 | 403 => StatusClass::Unauthorized,
            404 => StatusClass::NotFound,
            413 => StatusClass::PayloadTooLarge,
            429 => StatusClass::RateLimited {
                global: headers::is_global(headers),
            },
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Unexpected,
        }
    }
}

// ============================================================================
// ApiFailure
// ============================================================================

/// Error payload the server attaches to failed requests
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiDiagnostic {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    /// Field-level validation errors, kept verbatim
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

/// A non-success response, with the server's diagnostic when it sent one
#[derive(Debug, Clone)]
pub struct ApiFailure {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
    pub diagnostic: Option<ApiDiagnostic>,
}

impl From<ResponseRecord> for ApiFailure {
    fn from(response: ResponseRecord) -> Self {
        let diagnostic = serde_json::from_str::<ApiDiagnostic>(&response.body)
            .ok()
            .filter(|d| d.code.is_some() || d.message.is_some() || d.errors.is_some());
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            diagnostic,
        }
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.diagnostic.as_ref().and_then(|d| d.message.as_deref()) {
            Some(message) => write!(f, "{} ({message})", self.status),
            None => write!(f, "{}", self.status),
        }
    }
}
