mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;

use common::{MockBackend, stale_store};
use strategy_client::ApiError;
use strategy_client::gateway::{ApiGateway, AuthState, MemoryTokenStore};

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let backend = MockBackend::start().await;
    backend.set_refresh(true, Duration::from_millis(150));
    let store = stale_store();
    let gateway = backend.gateway_with_stale_session(store.clone()).await;

    let calls = (0..4).map(|_| gateway.get::<Value>("protected"));
    let results = join_all(calls).await;

    for result in &results {
        assert_eq!(result.as_ref().unwrap()["ok"], true);
    }
    assert_eq!(backend.hits("refresh"), 1);
    assert_eq!(gateway.session().state(), AuthState::Authenticated);
    assert_eq!(gateway.session().access_token().await.as_deref(), Some("access-1"));
    assert_eq!(store.snapshot().unwrap().access_token, "access-1");
    assert_eq!(store.clear_count(), 0);

    backend.shutdown().await;
}

#[tokio::test]
async fn failed_refresh_signs_out_exactly_once() {
    let backend = MockBackend::start().await;
    backend.set_refresh(false, Duration::from_millis(150));
    let store = stale_store();
    let gateway = backend.gateway_with_stale_session(store.clone()).await;
    let mut states = gateway.session().subscribe();

    let results = join_all((0..2).map(|_| gateway.get::<Value>("protected"))).await;

    for result in results {
        assert!(matches!(result, Err(ApiError::AuthExpired)));
    }
    assert_eq!(backend.hits("refresh"), 1);
    assert_eq!(store.clear_count(), 1);
    assert!(store.snapshot().is_none());
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), AuthState::Expired);
    assert!(gateway.session().current().await.is_none());

    // Nothing left to recover: later calls fail without another exchange
    let again = gateway.get::<Value>("protected").await;
    assert!(matches!(again, Err(ApiError::AuthExpired)));
    assert_eq!(backend.hits("refresh"), 1);
    assert_eq!(store.clear_count(), 1);

    backend.shutdown().await;
}

#[tokio::test]
async fn login_then_requests_carry_the_bearer_token() {
    let backend = MockBackend::start().await;
    let gateway = backend.signed_in_gateway().await;

    let body: Value = gateway.get("protected").await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(backend.hits("refresh"), 0);
    assert_eq!(gateway.session().state(), AuthState::Authenticated);

    gateway.logout().await;
    assert_eq!(gateway.session().state(), AuthState::Anonymous);
    let err = gateway.get::<Value>("protected").await.unwrap_err();
    assert!(err.is_auth_expired());

    backend.shutdown().await;
}

#[tokio::test]
async fn rejected_login_surfaces_backend_detail() {
    let backend = MockBackend::start().await;
    let gateway = ApiGateway::new(&backend.config(), Arc::new(MemoryTokenStore::new())).unwrap();

    let err = gateway.login("user@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, ApiError::Remote { status: 400, .. }));
    assert_eq!(err.to_string(), "Incorrect email or password");
    assert_eq!(gateway.session().state(), AuthState::Anonymous);

    backend.shutdown().await;
}

#[tokio::test]
async fn slow_backend_maps_to_network_timeout() {
    let backend = MockBackend::start().await;
    let config = backend.config().with_request_timeout(Duration::from_millis(200));
    let gateway = ApiGateway::new(&config, Arc::new(MemoryTokenStore::new())).unwrap();

    let err = gateway.get::<Value>("slow").await.unwrap_err();
    assert!(matches!(err, ApiError::NetworkTimeout), "got {err:?}");

    backend.shutdown().await;
}

#[tokio::test]
async fn remote_detail_is_passed_through_or_replaced_by_fallback() {
    let backend = MockBackend::start().await;
    let gateway = backend.signed_in_gateway().await;

    let err = gateway.get::<Value>("error-detail").await.unwrap_err();
    assert!(matches!(err, ApiError::Remote { status: 404, .. }));
    assert_eq!(err.or_fallback("Failed to load strategy").to_string(), "Strategy not found");

    // Non-string details are not shown to the user
    let err = gateway.get::<Value>("error-structured").await.unwrap_err();
    assert!(matches!(err, ApiError::Remote { status: 422, detail: None }));
    assert_eq!(err.or_fallback("Failed to create strategy").to_string(), "Failed to create strategy");

    backend.shutdown().await;
}
