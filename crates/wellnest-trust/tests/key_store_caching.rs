//! Key set caching against a real HTTP endpoint
//!
//! Fetch counts are asserted through wiremock expectations, verified when the
//! mock server is dropped at the end of each test.

mod common;

use common::{MockKeyServer, OTHER_KEY, PRIMARY_KEY};
use serde_json::json;
use std::time::Duration;
use wellnest_trust::{AuthError, KeyStore, KeyStoreConfig};

fn store(server: &MockKeyServer, ttl: Option<Duration>) -> KeyStore {
    KeyStore::from_config(
        &KeyStoreConfig::default()
            .with_keys_url(server.keys_url())
            .with_cache_ttl(ttl),
    )
    .expect("key store")
}

#[tokio::test]
async fn test_key_set_fetched_once_within_ttl() {
    let server = MockKeyServer::start().await;
    server.serve_keys(&[PRIMARY_KEY.jwk()], 1).await;
    let store = store(&server, Some(Duration::from_secs(3600)));

    for _ in 0..5 {
        let key = store.find_key_by_id("abc").await.unwrap();
        assert_eq!(key.key_id(), "abc");
    }
}

#[tokio::test]
async fn test_key_set_refetched_after_ttl() {
    let server = MockKeyServer::start().await;
    server.serve_keys(&[PRIMARY_KEY.jwk()], 3).await;
    let store = store(&server, Some(Duration::ZERO));

    for _ in 0..3 {
        store.get_keys().await.unwrap();
    }
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let server = MockKeyServer::start().await;
    server.serve_keys(&[PRIMARY_KEY.jwk()], 2).await;
    let store = store(&server, None);

    store.get_keys().await.unwrap();
    store.get_keys().await.unwrap();
    store.invalidate().await;
    store.get_keys().await.unwrap();
}

#[tokio::test]
async fn test_stale_keys_served_during_outage() {
    let server = MockKeyServer::start().await;
    server.serve_keys_times(&[PRIMARY_KEY.jwk()], 1).await;
    server.serve_status(503).await;
    let store = store(&server, Some(Duration::ZERO));

    let fresh = store.get_keys().await.unwrap();
    let stale = store.get_keys().await.unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(stale[0].key_id(), "abc");
}

#[tokio::test]
async fn test_outage_without_cache_is_upstream_unavailable() {
    let server = MockKeyServer::start().await;
    server.serve_status(500).await;
    let store = store(&server, None);

    assert!(matches!(
        store.get_keys().await,
        Err(AuthError::UpstreamUnavailable(_))
    ));
}

#[tokio::test]
async fn test_malformed_key_set_is_upstream_unavailable() {
    let server = MockKeyServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server.server)
        .await;
    let store = store(&server, None);

    assert!(matches!(
        store.get_keys().await,
        Err(AuthError::UpstreamUnavailable(_))
    ));
}

#[tokio::test]
async fn test_unusable_keys_are_skipped() {
    let server = MockKeyServer::start().await;
    let broken = json!({"kty": "RSA", "kid": "broken", "n": "!!!", "e": "AQAB"});
    let symmetric = json!({"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"});
    server
        .serve_keys(&[broken, symmetric, OTHER_KEY.jwk()], 1)
        .await;
    let store = store(&server, None);

    let keys = store.get_keys().await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].key_id(), "other");
}

#[tokio::test]
async fn test_rotated_key_found_after_refresh() {
    let server = MockKeyServer::start().await;
    server.serve_keys_times(&[PRIMARY_KEY.jwk()], 1).await;
    server
        .serve_keys(&[PRIMARY_KEY.jwk(), OTHER_KEY.jwk()], 1)
        .await;

    let store = KeyStore::from_config(
        &KeyStoreConfig {
            min_refresh_interval: Duration::ZERO,
            ..KeyStoreConfig::default().with_keys_url(server.keys_url())
        },
    )
    .unwrap();

    store.get_keys().await.unwrap();
    let rotated = store.find_key_by_id("other").await.unwrap();
    assert_eq!(rotated.key_id(), "other");
}
