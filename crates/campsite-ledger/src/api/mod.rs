//! HTTP surface over [`LedgerService`]

pub mod error;
pub mod routes;
pub mod types;

use crate::domain::commands::ShutdownEvent;
use crate::domain::ledger::LedgerService;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};

pub use error::ApiError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerService>,
    /// Producer side of the forced-shutdown feed
    pub shutdown_feed: mpsc::Sender<ShutdownEvent>,
}

/// Organization-scoped ledger routes
pub fn routes(state: AppState) -> Router {
    let organization = Router::new()
        .route(
            "/bookings/:booking/balance",
            get(routes::bookings::get_balance),
        )
        .route(
            "/bookings/:booking/packages",
            post(routes::bookings::create_package),
        )
        .route(
            "/bookings/:booking",
            delete(routes::bookings::checkout),
        )
        .route(
            "/bookings/:booking/meter",
            put(routes::bookings::assign_meter),
        )
        .route(
            "/bookings/:booking/extra-meters",
            post(routes::bookings::attach_extra_meter),
        )
        .route(
            "/bookings/:booking/extra-meters/:meter",
            delete(routes::bookings::detach_extra_meter),
        )
        .route("/meters/:meter/power", post(routes::meters::request_power))
        .route(
            "/meters/:meter/readings",
            get(routes::meters::reading_history),
        )
        .route(
            "/shutdown-events",
            post(routes::events::push_shutdown_event),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1/organizations/:org", organization)
        .route("/health", get(routes::health::health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(state)
}
