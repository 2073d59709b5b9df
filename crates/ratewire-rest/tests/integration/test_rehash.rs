//! Routes whose bucket hash changes between responses

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::Mock;

use crate::common::{bucket_response, get, setup_rest_mock};

#[tokio::test]
async fn test_rehash_moves_route_to_new_bucket() {
    let (server, client) = setup_rest_mock().await;

    Mock::given(method("GET"))
        .and(path("/widgets/7"))
        .respond_with(bucket_response("abc", 5, 4, Duration::from_secs(5)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/widgets/7"))
        .respond_with(bucket_response("xyz", 5, 3, Duration::from_secs(5)))
        .mount(&server)
        .await;

    let request = get("/widgets/:id", "/widgets/7");
    let route = request.route_key();
    let limiter = client.rate_limiter();

    client.execute(&request).await.unwrap();
    assert_eq!(limiter.registry().resolve(&route).as_deref(), Some("abc"));

    client.execute(&request).await.unwrap();
    assert_eq!(limiter.registry().resolve(&route).as_deref(), Some("xyz"));

    // Third request reserves from the new bucket
    client.execute(&request).await.unwrap();
    let current = limiter
        .bucket_for_route(&route, request.scope())
        .expect("current bucket");
    assert_eq!(current.hash(), "xyz");
    assert!(current.has_worn("abc"));

    let old = limiter.bucket("abc:::").expect("old bucket kept until swept");
    assert!(old.is_superseded());

    let history: Vec<String> = limiter
        .find_by_hash("abc")
        .iter()
        .map(|bucket| bucket.hash().to_string())
        .collect();
    assert_eq!(history, vec!["abc".to_string(), "xyz".to_string()]);
}
