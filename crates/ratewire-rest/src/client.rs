//! REST dispatcher
//!
//! [`RestClient`] turns a [`RequestDescriptor`] into a wire request, runs
//! it through the rate-limit gate and the retry loop, and classifies the
//! final status.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ratewire_core::config::Config;
//! use ratewire_core::domain::{HttpMethod, RequestDescriptor, RouteTemplate};
//! use ratewire_rest::RestClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = RestClient::new(&Config::default())?;
//! let route = RouteTemplate::new("/channels/:channel_id/messages")?;
//! let request = RequestDescriptor::new(HttpMethod::Get, route, "/channels/42/messages")?;
//! let response = client.execute(&request).await?;
//! println!("{}", response.body);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ratewire_core::config::Config;
use ratewire_core::domain::RequestDescriptor;
use ratewire_telemetry::{RequestMetrics, RequestOutcome};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use url::{ParseError, Url};
use uuid::Uuid;

use crate::bucket::duration_ms;
use crate::rate_limit::{Admission, RateLimiter, Throttle};
use crate::response::{ResponseRecord, StatusClass};
use crate::retry::{AttemptOutcome, RetryPolicy};
use crate::transport::{self, HttpTransport, ReqwestTransport, WireRequest};
use crate::RestError;

// ============================================================================
// RestClient
// ============================================================================

/// Rate-limited REST client
pub struct RestClient {
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<RequestMetrics>,
    retry: RetryPolicy,
    base_url: Url,
    user_agent: String,
    authorization: Option<String>,
    attempt_timeout: Duration,
    request_deadline: Option<Duration>,
    cleanup_interval: Duration,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("request_deadline", &self.request_deadline)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    /// Creates a client over a fresh reqwest transport
    pub fn new(config: &Config) -> Result<Self, RestError> {
        let transport = ReqwestTransport::new(config.rest.attempt_timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Creates a client over an arbitrary transport
    pub fn with_transport(
        config: &Config,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, RestError> {
        Ok(Self {
            transport,
            limiter: Arc::new(RateLimiter::new(&config.rate_limiting)),
            metrics: Arc::new(RequestMetrics::new()),
            retry: RetryPolicy::from_config(&config.rate_limiting),
            base_url: parse_base_url(&config.rest.base_url)?,
            user_agent: config.rest.user_agent.clone(),
            authorization: config.auth.authorization(),
            attempt_timeout: config.rest.attempt_timeout(),
            request_deadline: config.rest.request_deadline(),
            cleanup_interval: config.rate_limiting.cleanup_interval(),
        })
    }

    /// Share rate-limit state with other clients using the same identity
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RequestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Start the periodic bucket sweep
    pub fn spawn_cleanup(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.limiter.spawn_cleanup(self.cleanup_interval, shutdown)
    }

    /// Absolute URL for `url`, joining relative paths onto the base URL
    pub fn resolve_url(&self, url: &str) -> Result<Url, RestError> {
        let resolved = match Url::parse(url) {
            Err(ParseError::RelativeUrlWithoutBase) => {
                self.base_url.join(url.trim_start_matches('/'))
            }
            other => other,
        };
        resolved.map_err(|e| RestError::InvalidRequest(format!("url {url:?}: {e}")))
    }

    /// Build the wire form of `request`.
    ///
    /// Adds the user agent and authorization; headers set on the
    /// descriptor take precedence.
    pub fn build_request(&self, request: &RequestDescriptor) -> Result<WireRequest, RestError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value("User-Agent", &self.user_agent)?);
        if let Some(authorization) = &self.authorization {
            let mut value = header_value("Authorization", authorization)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in request.headers() {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RestError::InvalidRequest(format!("header name {name:?}: {e}")))?;
            headers.insert(header, header_value(name, value)?);
        }

        Ok(WireRequest {
            method: transport::method(request.method()),
            url: self.resolve_url(request.url())?.into(),
            headers,
            body: request.body().clone(),
        })
    }

    /// Execute `request` under the configured overall deadline
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<ResponseRecord, RestError> {
        self.execute_with_deadline(request, self.request_deadline).await
    }

    /// Execute `request`, giving up with [`RestError::Timeout`] once
    /// `deadline` has elapsed. Retries do not extend the deadline.
    pub async fn execute_with_deadline(
        &self,
        request: &RequestDescriptor,
        deadline: Option<Duration>,
    ) -> Result<ResponseRecord, RestError> {
        let result = match deadline {
            Some(limit) => match tokio::time::timeout(limit, self.dispatch(request)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        route = %request.route_key(),
                        deadline_ms = duration_ms(limit),
                        "Request deadline exceeded"
                    );
                    Err(RestError::Timeout(limit))
                }
            },
            None => self.dispatch(request).await,
        };
        self.metrics.record_outcome(outcome(&result));
        result
    }

    async fn dispatch(&self, request: &RequestDescriptor) -> Result<ResponseRecord, RestError> {
        let wire = &self.build_request(request)?;
        let response = self
            .retry
            .run(move |attempt| self.attempt(request, wire, attempt))
            .await?;
        self.classify(response)
    }

    /// One pass through the gate and, if admitted, over the wire
    async fn attempt(
        &self,
        request: &RequestDescriptor,
        wire: &WireRequest,
        attempt: u32,
    ) -> Result<AttemptOutcome, RestError> {
        let ticket = if self.retry.gating_enabled() {
            match self.limiter.admit(request) {
                Admission::Admitted(ticket) => ticket,
                Admission::Denied(throttle) => {
                    self.metrics.record_throttle(throttle.is_global());
                    return Ok(AttemptOutcome::Throttled {
                        throttle,
                        response: None,
                    });
                }
            }
        } else {
            self.limiter.bypass(request)
        };

        let correlation_id = Uuid::new_v4();
        let span = info_span!(
            "rest_attempt",
            correlation_id = %correlation_id,
            route = %ticket.route(),
            attempt,
            probe = ticket.is_probe()
        );

        let response = async {
            debug!(method = %wire.method, url = %wire.url, "Sending request");
            match tokio::time::timeout(self.attempt_timeout, self.transport.send(wire.clone()))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        timeout_ms = duration_ms(self.attempt_timeout),
                        "Attempt timed out"
                    );
                    Err(RestError::AttemptTimeout(self.attempt_timeout))
                }
            }
        }
        .instrument(span)
        .await?;

        self.limiter.observe(ticket, response.status, &response.headers);

        if response.status == StatusCode::TOO_MANY_REQUESTS {
            let throttle = Throttle::from_response(&response.headers, self.retry.fallback());
            self.metrics.record_throttle(throttle.is_global());
            warn!(
                %correlation_id,
                retry_after_ms = duration_ms(throttle.retry_after()),
                global = throttle.is_global(),
                "Server returned 429"
            );
            return Ok(AttemptOutcome::Throttled {
                throttle,
                response: Some(response),
            });
        }

        Ok(AttemptOutcome::Completed(response))
    }

    fn classify(&self, response: ResponseRecord) -> Result<ResponseRecord, RestError> {
        match StatusClass::classify(response.status, &response.headers) {
            StatusClass::Success => Ok(response),
            StatusClass::BadRequest => Err(RestError::BadRequest(response.into())),
            StatusClass::Unauthorized => Err(RestError::Unauthorized(response.into())),
            StatusClass::NotFound => Err(RestError::NotFound(response.into())),
            StatusClass::PayloadTooLarge => Err(RestError::PayloadTooLarge(response.into())),
            StatusClass::RateLimited { .. } => Err(RestError::RateLimited {
                throttle: Throttle::from_response(&response.headers, self.retry.fallback()),
                response: Some(response.into()),
            }),
            StatusClass::ServerError => Err(RestError::ServerError(response.into())),
            StatusClass::Unexpected => Err(RestError::UnexpectedStatus(response.into())),
        }
    }
}

/// Parse the configured base URL so relative paths join beneath it
fn parse_base_url(raw: &str) -> Result<Url, RestError> {
    let mut url = Url::parse(raw)
        .map_err(|e| RestError::InvalidRequest(format!("base url {raw:?}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, RestError> {
    HeaderValue::from_str(value)
        .map_err(|e| RestError::InvalidRequest(format!("header {name:?}: {e}")))
}

fn outcome(result: &Result<ResponseRecord, RestError>) -> RequestOutcome {
    match result {
        Ok(_) => RequestOutcome::Success,
        Err(RestError::BadRequest(_)) => RequestOutcome::BadRequest,
        Err(RestError::Unauthorized(_)) => RequestOutcome::Unauthorized,
        Err(RestError::NotFound(_)) => RequestOutcome::NotFound,
        Err(RestError::PayloadTooLarge(_)) => RequestOutcome::PayloadTooLarge,
        Err(RestError::RateLimited { .. }) => RequestOutcome::RateLimited,
        Err(RestError::ServerError(_)) => RequestOutcome::ServerError,
        Err(RestError::Transport(_) | RestError::AttemptTimeout(_)) => {
            RequestOutcome::TransportFailure
        }
        Err(
            RestError::UnexpectedStatus(_) | RestError::Timeout(_) | RestError::InvalidRequest(_),
        ) => RequestOutcome::Other,
    }
}
