mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use campsite_ledger::api::{self, AppState};
use campsite_ledger::domain::{MeterId, OrganizationId, PowerState, ShutdownReason};
use campsite_ledger::server::spawn_shutdown_consumer;
use campsite_ledger::storage::MemoryStore;
use common::{base_time, ledger, record, seat_booking};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower::ServiceExt;

fn app(store: &MemoryStore) -> (Router, JoinHandle<()>) {
    let ledger = Arc::new(ledger(store));
    let (feed_tx, feed_rx) = mpsc::channel(16);
    let consumer = spawn_shutdown_consumer(feed_rx, ledger.clone());
    let router = api::routes(AppState {
        ledger,
        shutdown_feed: feed_tx,
    });
    (router, consumer)
}

async fn send(
    router: &Router,
    method: &str,
    uri: String,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[test_log::test(tokio::test)]
async fn test_health_endpoint() {
    let store = MemoryStore::new();
    let (router, _consumer) = app(&store);

    let (status, body) = send(&router, "GET", "/health".to_string(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[test_log::test(tokio::test)]
async fn test_purchase_then_balance() {
    let store = MemoryStore::new();
    let (router, _consumer) = app(&store);
    let org = OrganizationId::new();
    let meter = MeterId::new("M-1");

    seat_booking(&store, org, "B-1", &meter, dec!(0)).await;
    record(&store, &meter, dec!(3), chrono::Utc::now()).await;

    let (status, purchase) = send(
        &router,
        "POST",
        format!("/api/v1/organizations/{org}/bookings/B-1/packages"),
        Some(json!({
            "category": "dagspakke",
            "units": "20",
            "payment_method": "card",
            "duration_hours": 24
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(purchase["package"]["category"], "dagspakke");

    let (status, statement) = send(
        &router,
        "GET",
        format!("/api/v1/organizations/{org}/bookings/B-1/balance"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(statement["booking_number"], "B-1");
    assert_eq!(statement["balance"]["low_balance"], false);
    assert_eq!(statement["cutoff_reason"], Value::Null);
}

#[test_log::test(tokio::test)]
async fn test_error_bodies_carry_codes() {
    let store = MemoryStore::new();
    let (router, _consumer) = app(&store);
    let org = OrganizationId::new();
    let taken = MeterId::new("M-TAKEN");

    seat_booking(&store, org, "B-HOLDER", &taken, dec!(0)).await;
    seat_booking(&store, org, "B-MOVER", &MeterId::new("M-2"), dec!(0)).await;
    record(&store, &taken, dec!(1), base_time()).await;

    let (status, body) = send(
        &router,
        "PUT",
        format!("/api/v1/organizations/{org}/bookings/B-MOVER/meter"),
        Some(json!({ "meter_id": "M-TAKEN" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "LEDGER_METER_CONFLICT");
    assert_eq!(body["error"]["retryable"], false);

    let (status, body) = send(
        &router,
        "GET",
        format!("/api/v1/organizations/{org}/bookings/B-UNKNOWN/balance"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "LEDGER_BOOKING_NOT_FOUND");

    let (status, body) = send(
        &router,
        "POST",
        format!("/api/v1/organizations/{org}/meters/M-2/power"),
        Some(json!({ "state": "ON" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "LEDGER_POWER_REFUSED");

    let (status, body) = send(
        &router,
        "POST",
        format!("/api/v1/organizations/{org}/meters/M-2/power"),
        Some(json!({ "state": "dim" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "LEDGER_VALIDATION_ERROR");

    let (status, body) = send(
        &router,
        "GET",
        format!(
            "/api/v1/organizations/{}/meters/M-TAKEN/readings",
            OrganizationId::new()
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "LEDGER_METER_NOT_FOUND");

    let (status, body) = send(
        &router,
        "POST",
        format!("/api/v1/organizations/{org}/bookings/B-MOVER/extra-meters"),
        Some(json!({ "meter_id": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "LEDGER_BAD_REQUEST");
}

#[test_log::test(tokio::test)]
async fn test_shutdown_events_reach_the_ledger() {
    let store = MemoryStore::new();
    let (router, consumer) = app(&store);
    let org = OrganizationId::new();
    let meter = MeterId::new("M-1");

    let (status, _) = send(
        &router,
        "POST",
        format!("/api/v1/organizations/{org}/shutdown-events"),
        Some(json!({ "meter_id": "M-1", "reason": "units_exhausted" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(
        &router,
        "POST",
        format!("/api/v1/organizations/{org}/shutdown-events"),
        Some(json!({ "meter_id": "M-1", "reason": "lightning" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "LEDGER_VALIDATION_ERROR");

    // Dropping the last sender lets the consumer drain and stop.
    drop(router);
    consumer.await.unwrap();

    let state = store.snapshot().await;
    let record = &state.meters[&(org, meter)];
    assert_eq!(record.power_state, PowerState::Off);
    assert_eq!(
        record.last_shutdown_reason,
        Some(ShutdownReason::UnitsExhausted)
    );
}
