//! Power requests and telemetry history

use crate::api::error::{ApiError, Result};
use crate::api::types::{HistoryQuery, PowerRequest};
use crate::api::AppState;
use crate::domain::ledger::PowerChange;
use crate::domain::meters::MeterReading;
use crate::domain::types::{MeterId, OrganizationId, PowerState};
use crate::error::LedgerError;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

pub async fn request_power(
    State(state): State<AppState>,
    Path((org, meter)): Path<(Uuid, String)>,
    Json(request): Json<PowerRequest>,
) -> Result<Json<PowerChange>> {
    let value: PowerState = request
        .state
        .parse()
        .map_err(|message: String| ApiError::from(LedgerError::validation("state", message)))?;

    let change = state
        .ledger
        .request_power(
            &OrganizationId::from_uuid(org),
            &MeterId::new(meter),
            value,
            Utc::now(),
        )
        .await?;
    Ok(Json(change))
}

/// Defaults to the last 24 hours.
pub async fn reading_history(
    State(state): State<AppState>,
    Path((org, meter)): Path<(Uuid, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MeterReading>>> {
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - Duration::hours(24));

    let readings = state
        .ledger
        .meter_history(&OrganizationId::from_uuid(org), &MeterId::new(meter), from, to)
        .await?;
    Ok(Json(readings))
}
