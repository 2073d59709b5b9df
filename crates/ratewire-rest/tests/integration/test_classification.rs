//! Final status classification

use std::time::Duration;

use ratewire_core::domain::{FileAttachment, HttpMethod, RequestDescriptor, RouteTemplate};
use ratewire_rest::RestError;
use wiremock::matchers::{body_string_contains, header_regex, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{bucket_response, get, setup_rest_mock};

async fn error_for(status: u16, body: &str) -> RestError {
    let (server, client) = setup_rest_mock().await;
    Mock::given(method("GET"))
        .and(path("/target"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;
    client.execute(&get("/target", "/target")).await.unwrap_err()
}

#[tokio::test]
async fn test_bad_request_keeps_diagnostic() {
    let body = r#"{"code":50035,"message":"Invalid Form Body","errors":{"content":{"_errors":[{"code":"BASE_TYPE_REQUIRED","message":"This field is required"}]}}}"#;
    let err = error_for(400, body).await;
    let RestError::BadRequest(failure) = err else {
        panic!("expected BadRequest, got {err:?}");
    };
    assert_eq!(failure.body, body);
    let diagnostic = failure.diagnostic.expect("diagnostic");
    assert_eq!(diagnostic.code, Some(50035));
    assert_eq!(diagnostic.message.as_deref(), Some("Invalid Form Body"));
    assert!(diagnostic.errors.is_some());
}

#[tokio::test]
async fn test_method_not_allowed_is_bad_request() {
    assert!(matches!(error_for(405, "").await, RestError::BadRequest(_)));
}

#[tokio::test]
async fn test_authorization_failures() {
    assert!(matches!(error_for(401, "").await, RestError::Unauthorized(_)));
    assert!(matches!(error_for(403, "").await, RestError::Unauthorized(_)));
}

#[tokio::test]
async fn test_not_found_and_too_large() {
    assert!(matches!(error_for(404, "").await, RestError::NotFound(_)));
    assert!(matches!(error_for(413, "").await, RestError::PayloadTooLarge(_)));
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    // expect(1) on the mock fails the test if a retry reaches the server
    let err = error_for(502, "bad gateway").await;
    assert!(matches!(err, RestError::ServerError(_)));
}

#[tokio::test]
async fn test_unexpected_status() {
    assert!(matches!(error_for(418, "").await, RestError::UnexpectedStatus(_)));
}

#[tokio::test]
async fn test_transport_failure_is_surfaced() {
    let (server, client) = setup_rest_mock().await;
    drop(server);

    let err = client.execute(&get("/gone", "/gone")).await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err:?}");
    assert_eq!(client.metrics().lifetime().counters.transport_failures, 1);
}

#[tokio::test]
async fn test_multipart_upload() {
    let (server, client) = setup_rest_mock().await;

    Mock::given(method("POST"))
        .and(path("/channels/5/messages"))
        .and(header_regex("content-type", "^multipart/form-data; boundary="))
        .and(body_string_contains("name=\"payload_json\""))
        .and(body_string_contains("name=\"files[0]\"; filename=\"a.txt\""))
        .and(body_string_contains("name=\"files[1]\"; filename=\"b.txt\""))
        .respond_with(bucket_response("msgs", 5, 4, Duration::from_secs(1)))
        .expect(1)
        .mount(&server)
        .await;

    let request = RequestDescriptor::new(
        HttpMethod::Post,
        RouteTemplate::new("/channels/:channel_id/messages").unwrap(),
        "/channels/5/messages",
    )
    .unwrap()
    .with_files(
        Some(r#"{"content":"two files"}"#.to_string()),
        vec![
            FileAttachment::new("a.txt", b"first".to_vec()).with_content_type("text/plain"),
            FileAttachment::new("b.txt", b"second".to_vec()),
        ],
    );

    client.execute(&request).await.unwrap();
}

#[tokio::test]
async fn test_json_body_is_sent_verbatim() {
    let (server, client) = setup_rest_mock().await;

    Mock::given(method("PATCH"))
        .and(path("/widgets/3"))
        .and(header_regex("content-type", "^application/json"))
        .and(body_string_contains(r#"{"name":"renamed"}"#))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let request = RequestDescriptor::new(
        HttpMethod::Patch,
        RouteTemplate::new("/widgets/:id").unwrap(),
        "/widgets/3",
    )
    .unwrap()
    .with_json_body(r#"{"name":"renamed"}"#);

    let response = client.execute(&request).await.unwrap();
    assert_eq!(response.status.as_u16(), 204);
    assert!(response.body.is_empty());
}
