//! Wire transport
//!
//! [`HttpTransport`] is the one seam between the dispatcher and the
//! network. [`ReqwestTransport`] is the production implementation; tests
//! substitute scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use ratewire_core::domain::{FileAttachment, HttpMethod, RequestBody};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use tracing::debug;

use crate::response::ResponseRecord;
use crate::RestError;

/// A fully built request, ready to send
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    /// Absolute URL
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

/// Sends one request and reads the whole response
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<ResponseRecord, RestError>;
}

pub(crate) fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, RestError> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self { client })
    }

    /// Reuse an existing client, e.g. one with custom TLS or proxy settings
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// One part per attachment (`files[i]`) plus the JSON payload part
fn multipart_form(
    payload_json: Option<&str>,
    files: &[FileAttachment],
) -> Result<Form, RestError> {
    let mut form = Form::new();
    if let Some(json) = payload_json {
        let part = Part::text(json.to_string()).mime_str("application/json")?;
        form = form.part("payload_json", part);
    }
    for (index, file) in files.iter().enumerate() {
        let content_type = file
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        let part = Part::bytes(file.data.clone())
            .file_name(file.file_name.clone())
            .mime_str(content_type)?;
        form = form.part(format!("files[{index}]"), part);
    }
    Ok(form)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: WireRequest) -> Result<ResponseRecord, RestError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers);

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(json) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(json.clone()),
            RequestBody::Multipart {
                payload_json,
                files,
            } => builder.multipart(multipart_form(payload_json.as_deref(), files)?),
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        debug!(
            method = %request.method,
            url = %request.url,
            status = status.as_u16(),
            "Response received"
        );

        Ok(ResponseRecord::new(status, headers, body))
    }
}
