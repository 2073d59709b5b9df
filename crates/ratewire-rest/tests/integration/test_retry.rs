//! Throttle handling: server 429s, local bucket and global throttles,
//! retry bounds and deadlines

use std::sync::Arc;
use std::time::{Duration, Instant};

use ratewire_rest::RestError;
use wiremock::matchers::{method, path};
use wiremock::Mock;

use crate::common::{bucket_response, client_for, get, setup_rest_mock, test_config, throttled_response};

#[tokio::test]
async fn test_server_429_is_retried_after_wait() {
    let (server, client) = setup_rest_mock().await;

    Mock::given(method("GET"))
        .and(path("/widgets"))
        .respond_with(throttled_response(Duration::from_millis(300), false))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/widgets"))
        .respond_with(bucket_response("w", 5, 4, Duration::from_secs(1)))
        .mount(&server)
        .await;

    let start = Instant::now();
    client.execute(&get("/widgets", "/widgets")).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(300));

    let counters = client.metrics().lifetime().counters;
    assert_eq!(counters.bucket_rate_limits, 1);
    assert_eq!(counters.successes, 1);
}

#[tokio::test]
async fn test_exhausted_bucket_is_throttled_locally_until_reset() {
    let (server, client) = setup_rest_mock().await;

    Mock::given(method("GET"))
        .and(path("/widgets/1"))
        .respond_with(bucket_response("abc", 5, 0, Duration::from_millis(500)))
        .expect(2)
        .mount(&server)
        .await;

    let request = get("/widgets/:id", "/widgets/1");
    client.execute(&request).await.unwrap();

    // remaining=0: the second request waits for the reset instead of
    // drawing a 429 from the server
    let start = Instant::now();
    client.execute(&request).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(400));

    let counters = client.metrics().lifetime().counters;
    assert_eq!(counters.bucket_rate_limits, 1);
    assert_eq!(counters.successes, 2);
}

#[tokio::test]
async fn test_global_window_delays_third_request() {
    let server = wiremock::MockServer::start().await;
    let client = Arc::new(client_for(
        test_config(&server)
            .rate_limiting_global_max_requests(2)
            .rate_limiting_global_window_ms(1000),
    ));

    for route in ["/a", "/b", "/c"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(bucket_response(route, 5, 4, Duration::from_secs(1)))
            .mount(&server)
            .await;
    }

    let start = Instant::now();
    let handles: Vec<_> = ["/a", "/b", "/c"]
        .into_iter()
        .map(|route| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client.execute(&get(route, route)).await?;
                Ok::<_, RestError>(start.elapsed())
            })
        })
        .collect();

    let mut finished = Vec::new();
    for handle in handles {
        finished.push(handle.await.unwrap().unwrap());
    }
    finished.sort();

    assert!(finished[1] < Duration::from_millis(900));
    assert!(finished[2] >= Duration::from_millis(900));
    assert_eq!(client.metrics().lifetime().counters.global_rate_limits, 1);
}

#[tokio::test]
async fn test_global_exemption_is_not_delayed() {
    let server = wiremock::MockServer::start().await;
    let client = client_for(
        test_config(&server)
            .rate_limiting_global_max_requests(1)
            .rate_limiting_global_window_ms(5000),
    );

    Mock::given(method("GET"))
        .respond_with(bucket_response("any", 50, 49, Duration::from_secs(1)))
        .mount(&server)
        .await;

    client.execute(&get("/first", "/first")).await.unwrap();

    let start = Instant::now();
    let exempt = get("/second", "/second").exempt_from_global_limit();
    client.execute(&exempt).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(client.metrics().lifetime().counters.global_rate_limits, 0);
}

#[tokio::test]
async fn test_bounded_retries_surface_global_rate_limit() {
    let server = wiremock::MockServer::start().await;
    let client = client_for(test_config(&server).rate_limiting_max_retries(Some(1)));

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(throttled_response(Duration::from_millis(100), true))
        .expect(2)
        .mount(&server)
        .await;

    let err = client.execute(&get("/busy", "/busy")).await.unwrap_err();
    let RestError::RateLimited { throttle, response } = err else {
        panic!("expected RateLimited, got {err:?}");
    };
    assert!(throttle.is_global());
    assert_eq!(throttle.retry_after(), Duration::from_millis(100));
    let failure = response.expect("server response");
    assert_eq!(failure.status.as_u16(), 429);
    assert_eq!(
        failure.diagnostic.and_then(|d| d.message).as_deref(),
        Some("You are being rate limited.")
    );
}

#[tokio::test]
async fn test_zero_retries_fail_fast() {
    let server = wiremock::MockServer::start().await;
    let client = client_for(test_config(&server).rate_limiting_max_retries(Some(0)));

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(throttled_response(Duration::from_secs(30), false))
        .expect(1)
        .mount(&server)
        .await;

    let start = Instant::now();
    let err = client.execute(&get("/busy", "/busy")).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_deadline_cuts_retry_short() {
    let (server, client) = setup_rest_mock().await;

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(throttled_response(Duration::from_secs(30), false))
        .mount(&server)
        .await;

    let err = client
        .execute_with_deadline(&get("/busy", "/busy"), Some(Duration::from_millis(300)))
        .await
        .unwrap_err();
    assert!(matches!(err, RestError::Timeout(d) if d == Duration::from_millis(300)));
    assert_eq!(client.metrics().lifetime().counters.other_failures, 1);
}
