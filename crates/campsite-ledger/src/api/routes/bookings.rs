//! Booking balance, package and meter handlers

use crate::api::error::Result;
use crate::api::routes::body_meter_id;
use crate::api::types::MeterRequest;
use crate::api::AppState;
use crate::domain::assignment::{AssignmentOutcome, CheckoutSummary, DetachedMeter};
use crate::domain::ledger::{BalanceStatement, PackagePurchase};
use crate::domain::meters::ExtraMeter;
use crate::domain::packages::PackageRequest;
use crate::domain::types::{BookingNumber, MeterId, OrganizationId};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

fn booking_path(org: Uuid, booking: String) -> (OrganizationId, BookingNumber) {
    (OrganizationId::from_uuid(org), BookingNumber::new(booking))
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path((org, booking)): Path<(Uuid, String)>,
) -> Result<Json<BalanceStatement>> {
    let (org, booking) = booking_path(org, booking);
    debug!(booking = %booking, "computing balance statement");

    let statement = state.ledger.statement(&org, &booking, Utc::now()).await?;
    Ok(Json(statement))
}

pub async fn create_package(
    State(state): State<AppState>,
    Path((org, booking)): Path<(Uuid, String)>,
    Json(request): Json<PackageRequest>,
) -> Result<(StatusCode, Json<PackagePurchase>)> {
    let (org, booking) = booking_path(org, booking);

    let purchase = state
        .ledger
        .create_package(&org, &booking, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

pub async fn checkout(
    State(state): State<AppState>,
    Path((org, booking)): Path<(Uuid, String)>,
) -> Result<Json<CheckoutSummary>> {
    let (org, booking) = booking_path(org, booking);

    let summary = state.ledger.checkout(&org, &booking).await?;
    Ok(Json(summary))
}

pub async fn assign_meter(
    State(state): State<AppState>,
    Path((org, booking)): Path<(Uuid, String)>,
    Json(request): Json<MeterRequest>,
) -> Result<Json<AssignmentOutcome>> {
    let (org, booking) = booking_path(org, booking);
    let meter_id = body_meter_id(request.meter_id)?;

    let outcome = state
        .ledger
        .assign_meter(&org, &booking, &meter_id, Utc::now())
        .await?;
    Ok(Json(outcome))
}

pub async fn attach_extra_meter(
    State(state): State<AppState>,
    Path((org, booking)): Path<(Uuid, String)>,
    Json(request): Json<MeterRequest>,
) -> Result<(StatusCode, Json<ExtraMeter>)> {
    let (org, booking) = booking_path(org, booking);
    let meter_id = body_meter_id(request.meter_id)?;

    let extra = state
        .ledger
        .attach_extra_meter(&org, &booking, &meter_id, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(extra)))
}

pub async fn detach_extra_meter(
    State(state): State<AppState>,
    Path((org, booking, meter)): Path<(Uuid, String, String)>,
) -> Result<Json<DetachedMeter>> {
    let (org, booking) = booking_path(org, booking);
    let meter_id = MeterId::new(meter);

    let detached = state
        .ledger
        .detach_extra_meter(&org, &booking, &meter_id, Utc::now())
        .await?;
    Ok(Json(detached))
}
