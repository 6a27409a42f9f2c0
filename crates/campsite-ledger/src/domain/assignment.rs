//! Meter moves, extra meters and checkout
//!
//! Each operation runs as one [`LedgerTransaction`]: the booking row is locked
//! first, readings are taken after the lock, and nothing is visible until
//! commit. Any early return drops the transaction and rolls it back.

use crate::domain::allocator::{measure_usage, ConsumptionAllocator, UsageAnomaly};
use crate::domain::commands::{PowerCommand, PowerCommandIssuer};
use crate::domain::meters::{Booking, ExtraMeter, MeterAssignment};
use crate::domain::types::{BookingNumber, Kwh, MeterId, OrganizationId, PackageId};
use crate::error::{LedgerError, Result};
use crate::storage::{LedgerStore, LedgerTransaction, MeterReadingSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    /// The booking already sits on the requested meter.
    Unchanged { meter_id: MeterId },
    Assigned(MeterMove),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeterMove {
    pub booking_number: BookingNumber,
    pub previous_meter: Option<MeterId>,
    pub meter_id: MeterId,
    pub start_energy: Kwh,
    /// Usage measured on the vacated meter and added to every active package
    pub carried_usage: Kwh,
    pub carried_packages: Vec<PackageId>,
    pub anomaly: Option<UsageAnomaly>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetachedMeter {
    pub meter_id: MeterId,
    pub carried_usage: Kwh,
    pub anomaly: Option<UsageAnomaly>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSummary {
    pub booking_number: BookingNumber,
    pub packages_removed: u64,
    pub meters_released: Vec<MeterId>,
}

pub struct MeterAssignmentManager {
    store: Arc<dyn LedgerStore>,
    readings: Arc<dyn MeterReadingSource>,
}

impl MeterAssignmentManager {
    pub fn new(store: Arc<dyn LedgerStore>, readings: Arc<dyn MeterReadingSource>) -> Self {
        Self { store, readings }
    }

    /// Move a booking onto `new_meter`, carrying usage measured on the old
    /// meter into every active package.
    pub async fn assign_meter(
        &self,
        org: &OrganizationId,
        booking_number: &BookingNumber,
        new_meter: &MeterId,
        now: DateTime<Utc>,
    ) -> Result<AssignmentOutcome> {
        let mut tx = self.store.begin().await?;
        let booking = lock_booking(tx.as_mut(), org, booking_number).await?;

        if booking.meter_id() == Some(new_meter) {
            debug!(
                booking = %booking_number,
                meter = %new_meter,
                "meter already assigned, nothing to do"
            );
            return Ok(AssignmentOutcome::Unchanged {
                meter_id: new_meter.clone(),
            });
        }

        ensure_unowned(tx.as_mut(), org, new_meter).await?;
        let new_energy = self.require_energy(new_meter).await?;

        let packages = tx.packages(org, booking_number).await?;
        let reference =
            ConsumptionAllocator::reference_point(&packages, now, booking.meter_start_energy());

        let previous_meter = booking.meter_id().cloned();
        let (carried_usage, anomaly) = match (&previous_meter, reference.start_energy) {
            (Some(old_meter), Some(start)) => {
                let old_energy = self.energy(old_meter).await?;
                measure_usage(old_meter, start, old_energy)
            }
            _ => (Kwh::zero(), None),
        };

        if let Some(anomaly) = &anomaly {
            warn!(
                booking = %booking_number,
                anomaly = ?anomaly,
                "usage on vacated meter could not be measured cleanly"
            );
        }

        if reference.participating.is_empty() && carried_usage.is_positive() {
            warn!(
                booking = %booking_number,
                usage = %carried_usage,
                "no active package to carry vacated meter usage into"
            );
        }

        for package in packages
            .iter()
            .filter(|p| reference.participating.contains(&p.id))
        {
            tx.update_package_carry_over(
                &package.id,
                package.accumulated_usage + carried_usage,
                Some(new_energy),
            )
            .await?;
        }

        let assignment = MeterAssignment {
            meter_id: new_meter.clone(),
            start_energy: new_energy,
            start_time: now,
        };
        tx.set_booking_meter(org, booking_number, Some(&assignment))
            .await?;

        if let Some(old_meter) = &previous_meter {
            tx.set_meter_owner(org, old_meter, None).await?;
            PowerCommandIssuer::issue(tx.as_mut(), &PowerCommand::off(*org, old_meter.clone(), None))
                .await?;
        }
        tx.set_meter_owner(org, new_meter, Some(booking_number))
            .await?;

        tx.commit().await?;

        info!(
            booking = %booking_number,
            from = ?previous_meter,
            to = %new_meter,
            carried = %carried_usage,
            packages = reference.participating.len(),
            "meter reassigned"
        );

        Ok(AssignmentOutcome::Assigned(MeterMove {
            booking_number: booking_number.clone(),
            previous_meter,
            meter_id: new_meter.clone(),
            start_energy: new_energy,
            carried_usage,
            carried_packages: reference.participating,
            anomaly,
        }))
    }

    pub async fn attach_extra_meter(
        &self,
        org: &OrganizationId,
        booking_number: &BookingNumber,
        meter_id: &MeterId,
        now: DateTime<Utc>,
    ) -> Result<ExtraMeter> {
        let mut tx = self.store.begin().await?;
        lock_booking(tx.as_mut(), org, booking_number).await?;
        ensure_unowned(tx.as_mut(), org, meter_id).await?;

        let extra = ExtraMeter {
            organization_id: *org,
            booking_number: booking_number.clone(),
            meter_id: meter_id.clone(),
            start_energy: self.require_energy(meter_id).await?,
            attached_at: now,
        };
        tx.insert_extra_meter(&extra).await?;
        tx.commit().await?;

        info!(
            booking = %booking_number,
            meter = %meter_id,
            start_energy = %extra.start_energy,
            "extra meter attached"
        );
        Ok(extra)
    }

    /// Detach an extra meter and switch it off. Usage it measured while
    /// attached stays on the booking as carried usage.
    pub async fn detach_extra_meter(
        &self,
        org: &OrganizationId,
        booking_number: &BookingNumber,
        meter_id: &MeterId,
        now: DateTime<Utc>,
    ) -> Result<DetachedMeter> {
        let mut tx = self.store.begin().await?;
        lock_booking(tx.as_mut(), org, booking_number).await?;

        let extra = tx
            .extra_meters(org, booking_number)
            .await?
            .into_iter()
            .find(|e| &e.meter_id == meter_id)
            .ok_or_else(|| LedgerError::ExtraMeterNotAttached {
                booking: booking_number.clone(),
                meter_id: meter_id.clone(),
            })?;

        let energy = self.energy(meter_id).await?;
        let (carried_usage, anomaly) = measure_usage(meter_id, extra.start_energy, energy);

        if let Some(anomaly) = &anomaly {
            warn!(
                booking = %booking_number,
                meter = %meter_id,
                anomaly = ?anomaly,
                "usage on detached meter could not be measured cleanly"
            );
        }

        let packages = tx.packages(org, booking_number).await?;
        let reference = ConsumptionAllocator::reference_point(&packages, now, None);
        if reference.participating.is_empty() && carried_usage.is_positive() {
            warn!(
                booking = %booking_number,
                meter = %meter_id,
                usage = %carried_usage,
                "no active package to carry detached meter usage into"
            );
        }

        for package in packages
            .iter()
            .filter(|p| reference.participating.contains(&p.id))
        {
            tx.update_package_carry_over(
                &package.id,
                package.accumulated_usage + carried_usage,
                package.start_energy,
            )
            .await?;
        }

        tx.delete_extra_meter(org, booking_number, meter_id).await?;
        PowerCommandIssuer::issue(tx.as_mut(), &PowerCommand::off(*org, meter_id.clone(), None))
            .await?;
        tx.commit().await?;

        info!(
            booking = %booking_number,
            meter = %meter_id,
            carried = %carried_usage,
            "extra meter detached"
        );
        Ok(DetachedMeter {
            meter_id: meter_id.clone(),
            carried_usage,
            anomaly,
        })
    }

    /// Remove every package, release every meter and switch them off.
    pub async fn checkout(
        &self,
        org: &OrganizationId,
        booking_number: &BookingNumber,
    ) -> Result<CheckoutSummary> {
        let mut tx = self.store.begin().await?;
        let booking = lock_booking(tx.as_mut(), org, booking_number).await?;

        let packages_removed = tx.delete_packages(org, booking_number).await?;
        let mut meters_released = Vec::new();

        for extra in tx.extra_meters(org, booking_number).await? {
            tx.delete_extra_meter(org, booking_number, &extra.meter_id)
                .await?;
            meters_released.push(extra.meter_id);
        }

        if let Some(primary) = booking.meter_id() {
            tx.set_meter_owner(org, primary, None).await?;
            tx.set_booking_meter(org, booking_number, None).await?;
            meters_released.push(primary.clone());
        }

        for meter_id in &meters_released {
            PowerCommandIssuer::issue(tx.as_mut(), &PowerCommand::off(*org, meter_id.clone(), None))
                .await?;
        }

        tx.commit().await?;

        info!(
            booking = %booking_number,
            packages = packages_removed,
            meters = meters_released.len(),
            "booking checked out"
        );
        Ok(CheckoutSummary {
            booking_number: booking_number.clone(),
            packages_removed,
            meters_released,
        })
    }

    async fn energy(&self, meter_id: &MeterId) -> Result<Option<Kwh>> {
        Ok(self.readings.latest(meter_id).await?.map(|r| r.energy))
    }

    async fn require_energy(&self, meter_id: &MeterId) -> Result<Kwh> {
        self.energy(meter_id)
            .await?
            .ok_or_else(|| LedgerError::MeterReadingUnavailable {
                meter_id: meter_id.clone(),
            })
    }
}

async fn lock_booking(
    tx: &mut dyn LedgerTransaction,
    org: &OrganizationId,
    booking_number: &BookingNumber,
) -> Result<Booking> {
    tx.lock_booking(org, booking_number)
        .await?
        .ok_or_else(|| LedgerError::BookingNotFound {
            booking: booking_number.clone(),
        })
}

/// Fails when anyone, primary or extra, already holds the meter.
async fn ensure_unowned(
    tx: &mut dyn LedgerTransaction,
    org: &OrganizationId,
    meter_id: &MeterId,
) -> Result<()> {
    match tx.meter_ownership(org, meter_id).await? {
        Some(ownership) => Err(LedgerError::Conflict {
            meter_id: meter_id.clone(),
            owner: ownership.booking().clone(),
        }),
        None => Ok(()),
    }
}
