//! Integration tests for ratewire-rest
//!
//! Uses wiremock to simulate a rate-limited REST API and verifies
//! end-to-end behavior of the RestClient: bucket discovery, rehashing,
//! throttle retries and status classification.

mod common;

mod test_classification;
mod test_discovery;
mod test_rehash;
mod test_retry;
