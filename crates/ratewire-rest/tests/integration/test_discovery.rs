//! Bucket discovery for unknown routes

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{bucket_response, get, setup_rest_mock, TOKEN};

#[tokio::test]
async fn test_concurrent_unknown_route_sends_single_probe() {
    let (server, client) = setup_rest_mock().await;

    Mock::given(method("GET"))
        .and(path("/widgets/1"))
        .respond_with(
            bucket_response("abc", 10, 9, Duration::from_secs(5))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(5)
        .mount(&server)
        .await;

    let client = Arc::new(client);
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.execute(&get("/widgets/:id", "/widgets/1")).await })
        })
        .collect();

    for handle in handles {
        let response = handle.await.unwrap().expect("request succeeds");
        assert_eq!(response.status.as_u16(), 200);
    }

    let route = get("/widgets/:id", "/widgets/1").route_key();
    let limiter = client.rate_limiter();
    assert_eq!(limiter.registry().resolve(&route).as_deref(), Some("abc"));
    assert!(!limiter.registry().is_pending(&route));

    // One probe went out; the other four waited out the discovery window
    let counters = client.metrics().lifetime().counters;
    assert_eq!(counters.successes, 5);
    assert_eq!(counters.bucket_rate_limits, 4);
}

#[tokio::test]
async fn test_probe_seeds_bucket_from_headers() {
    let (server, client) = setup_rest_mock().await;

    Mock::given(method("GET"))
        .and(path("/channels/42/messages"))
        .and(header("authorization", format!("Bot {TOKEN}").as_str()))
        .respond_with(bucket_response("msgs", 5, 4, Duration::from_secs(2)))
        .mount(&server)
        .await;

    let request = get("/channels/:channel_id/messages", "/channels/42/messages");
    client.execute(&request).await.unwrap();

    let bucket = client
        .rate_limiter()
        .bucket_for_route(&request.route_key(), request.scope())
        .expect("bucket created");
    assert_eq!(bucket.id(), "msgs::42:");
    assert_eq!(bucket.maximum(), 5);
    assert_eq!(bucket.remaining(), 4);
}

#[tokio::test]
async fn test_route_without_bucket_headers_is_unlimited() {
    let (server, client) = setup_rest_mock().await;

    Mock::given(method("GET"))
        .and(path("/gateway"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(10)
        .mount(&server)
        .await;

    for _ in 0..10 {
        client.execute(&get("/gateway", "/gateway")).await.unwrap();
    }

    let route = get("/gateway", "/gateway").route_key();
    assert_eq!(
        client.rate_limiter().registry().resolve(&route).as_deref(),
        Some(ratewire_rest::bucket::UNLIMITED_HASH)
    );
    assert_eq!(client.metrics().lifetime().counters.bucket_rate_limits, 0);
}

#[tokio::test]
async fn test_failed_probe_lets_next_request_probe() {
    let (server, client) = setup_rest_mock().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(bucket_response("flaky", 5, 4, Duration::from_secs(1)))
        .mount(&server)
        .await;

    let request = get("/flaky", "/flaky");
    let err = client.execute(&request).await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
    assert!(!client.rate_limiter().registry().is_pending(&request.route_key()));

    client.execute(&request).await.unwrap();
    assert_eq!(
        client
            .rate_limiter()
            .registry()
            .resolve(&request.route_key())
            .as_deref(),
        Some("flaky")
    );
}
