//! Shared test helpers for REST integration tests
//!
//! Each helper returns a (MockServer, RestClient) pair with the client
//! pointed at the mock server and short rate-limit windows so tests run
//! in real time.

use std::time::Duration;

use ratewire_core::config::ConfigBuilder;
use ratewire_core::domain::{HttpMethod, RequestDescriptor, RouteTemplate};
use ratewire_rest::RestClient;
use wiremock::{MockServer, ResponseTemplate};

pub const TOKEN: &str = "test-token";

/// Builder preset used by every test; adjust before calling [`client_for`].
pub fn test_config(server: &MockServer) -> ConfigBuilder {
    ConfigBuilder::new()
        .rest_base_url(server.uri())
        .rest_attempt_timeout_secs(5)
        .rest_request_deadline_secs(None)
        .auth_token(TOKEN)
        .auth_scheme("Bot")
        .rate_limiting_discovery_window_ms(200)
        .rate_limiting_retry_fallback_ms(100)
}

pub fn client_for(config: ConfigBuilder) -> RestClient {
    RestClient::new(&config.build()).expect("client")
}

/// Starts a mock server and a client with the default test preset.
pub async fn setup_rest_mock() -> (MockServer, RestClient) {
    let server = MockServer::start().await;
    let client = client_for(test_config(&server));
    (server, client)
}

pub fn get(template: &str, url: &str) -> RequestDescriptor {
    RequestDescriptor::new(
        HttpMethod::Get,
        RouteTemplate::new(template).expect("template"),
        url,
    )
    .expect("descriptor")
}

/// 200 response describing bucket `hash`
pub fn bucket_response(hash: &str, limit: u32, remaining: u32, reset_after: Duration) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("X-RateLimit-Bucket", hash)
        .insert_header("X-RateLimit-Limit", limit.to_string().as_str())
        .insert_header("X-RateLimit-Remaining", remaining.to_string().as_str())
        .insert_header(
            "X-RateLimit-Reset-After",
            format!("{:.3}", reset_after.as_secs_f64()).as_str(),
        )
        .set_body_json(serde_json::json!({ "ok": true }))
}

/// 429 response asking the client to wait `retry_after`
pub fn throttled_response(retry_after: Duration, global: bool) -> ResponseTemplate {
    let mut template = ResponseTemplate::new(429)
        .insert_header(
            "Retry-After",
            format!("{:.3}", retry_after.as_secs_f64()).as_str(),
        )
        .set_body_json(serde_json::json!({
            "message": "You are being rate limited.",
            "retry_after": retry_after.as_secs_f64(),
            "global": global,
        }));
    if global {
        template = template
            .insert_header("X-RateLimit-Global", "true")
            .insert_header("X-RateLimit-Scope", "global");
    } else {
        template = template.insert_header("X-RateLimit-Scope", "user");
    }
    template
}
