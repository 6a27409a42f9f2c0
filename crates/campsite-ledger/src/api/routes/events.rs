//! Forced-shutdown feedback intake

use crate::api::error::{ApiError, Result};
use crate::api::routes::body_meter_id;
use crate::api::types::{AcceptedResponse, ShutdownEventRequest};
use crate::api::AppState;
use crate::domain::commands::ShutdownEvent;
use crate::domain::types::{OrganizationId, ShutdownReason};
use crate::error::LedgerError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;
use uuid::Uuid;

/// Queue the event for the shutdown-feed consumer.
pub async fn push_shutdown_event(
    State(state): State<AppState>,
    Path(org): Path<Uuid>,
    Json(request): Json<ShutdownEventRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let meter_id = body_meter_id(request.meter_id)?;
    let reason: ShutdownReason = request
        .reason
        .parse()
        .map_err(|message: String| ApiError::from(LedgerError::validation("reason", message)))?;

    let event = ShutdownEvent {
        organization_id: OrganizationId::from_uuid(org),
        meter_id,
        reason,
        received_at: Utc::now(),
    };

    match state.shutdown_feed.try_send(event) {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted: true }))),
        Err(TrySendError::Full(event)) => {
            warn!(meter = %event.meter_id, "shutdown feed is full, rejecting event");
            Err(ApiError::ServiceUnavailable)
        }
        Err(TrySendError::Closed(_)) => Err(ApiError::ServiceUnavailable),
    }
}
