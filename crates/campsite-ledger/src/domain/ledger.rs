//! Booking-level operations over the store and telemetry
//!
//! `LedgerService` is the one entry point the API and background loops use.
//! It takes every meter reading once per evaluation and feeds the same
//! snapshot to the allocator, the low-balance monitor and the power guard.

use crate::config::LedgerSettings;
use crate::domain::allocator::{
    Allocation, AllocationInput, ConsumptionAllocator, ExtraMeterUsage, UsageAnomaly,
};
use crate::domain::assignment::{
    AssignmentOutcome, CheckoutSummary, DetachedMeter, MeterAssignmentManager,
};
use crate::domain::balance::{BalanceSignal, LowBalanceMonitor, PowerGuard};
use crate::domain::commands::{EnqueueOutcome, PowerCommand, PowerCommandIssuer, ShutdownEvent};
use crate::domain::meters::{Booking, ExtraMeter, MeterReading};
use crate::domain::packages::{quote_price, Package, PackageRequest};
use crate::domain::types::{
    BookingNumber, CustomerKind, Kwh, MeterId, OrganizationId, PackageCategory, PowerState,
    ShutdownReason,
};
use crate::error::{LedgerError, Result};
use crate::storage::{LedgerStore, MeterReadingSource, OrganizationSettings};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceStatement {
    pub organization_id: OrganizationId,
    pub booking_number: BookingNumber,
    pub meter_id: Option<MeterId>,
    pub evaluated_at: DateTime<Utc>,
    pub balance: BalanceSignal,
    /// Why the primary meter must not be ON right now, if anything
    pub cutoff_reason: Option<ShutdownReason>,
    pub power_state: Option<PowerState>,
    pub last_shutdown_reason: Option<ShutdownReason>,
    pub extra_meters: Vec<ExtraMeterUsage>,
    pub allocation: Allocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackagePurchase {
    pub package: Package,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerChange {
    pub meter_id: MeterId,
    pub value: PowerState,
    pub outcome: EnqueueOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnforcementReport {
    pub evaluated: usize,
    pub switched_off: Vec<(MeterId, ShutdownReason)>,
    pub failed: usize,
}

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    readings: Arc<dyn MeterReadingSource>,
    assignments: MeterAssignmentManager,
    settings: LedgerSettings,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        readings: Arc<dyn MeterReadingSource>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            assignments: MeterAssignmentManager::new(store.clone(), readings.clone()),
            store,
            readings,
            settings,
        }
    }

    pub fn assignments(&self) -> &MeterAssignmentManager {
        &self.assignments
    }

    async fn organization_settings(&self, org: &OrganizationId) -> Result<OrganizationSettings> {
        Ok(self
            .store
            .settings(org)
            .await?
            .unwrap_or_else(|| OrganizationSettings {
                basis_price_per_unit: self.settings.default_basis_price_per_unit,
                low_balance_threshold: self.settings.low_balance_threshold(),
            }))
    }

    /// Latest counter value, with a stale-reading anomaly when it is too old.
    async fn snapshot(
        &self,
        meter_id: &MeterId,
        now: DateTime<Utc>,
        anomalies: &mut Vec<UsageAnomaly>,
    ) -> Result<Option<Kwh>> {
        let reading: Option<MeterReading> = self.readings.latest(meter_id).await?;
        Ok(reading.map(|r| {
            if r.is_stale(now, self.settings.reading_max_age()) {
                anomalies.push(UsageAnomaly::StaleReading {
                    meter_id: meter_id.clone(),
                    last_seen: r.time,
                });
            }
            r.energy
        }))
    }

    pub async fn statement(
        &self,
        org: &OrganizationId,
        booking_number: &BookingNumber,
        now: DateTime<Utc>,
    ) -> Result<BalanceStatement> {
        let booking = self
            .store
            .get_booking(org, booking_number)
            .await?
            .ok_or_else(|| LedgerError::BookingNotFound {
                booking: booking_number.clone(),
            })?;
        let packages = self.store.list_packages(org, booking_number).await?;
        let extras = self.store.list_extra_meters(org, booking_number).await?;
        let settings = self.organization_settings(org).await?;

        let mut anomalies = Vec::new();
        let current_meter_energy = match booking.meter_id() {
            Some(meter_id) => self.snapshot(meter_id, now, &mut anomalies).await?,
            None => None,
        };

        let mut extra_meters = Vec::with_capacity(extras.len());
        for extra in &extras {
            let energy = self.snapshot(&extra.meter_id, now, &mut anomalies).await?;
            let (usage, anomaly) = ExtraMeterUsage::measure(&extra.meter_id, extra.start_energy, energy);
            anomalies.extend(anomaly);
            extra_meters.push(usage);
        }

        let mut allocation = ConsumptionAllocator::allocate(&AllocationInput {
            packages: &packages,
            primary_meter: booking.meter_id(),
            current_meter_energy,
            meter_assignment_start_energy: booking.meter_start_energy(),
            extra_meter_usages: &extra_meters,
            now,
        });
        allocation.anomalies.extend(anomalies);

        for anomaly in &allocation.anomalies {
            warn!(
                booking = %booking_number,
                anomaly = ?anomaly,
                "meter anomaly while computing balance"
            );
        }

        let balance = LowBalanceMonitor::new(settings.low_balance_threshold).evaluate(&allocation);
        let cutoff_reason = PowerGuard::cutoff_reason(Some(&allocation));

        let meter_record = match booking.meter_id() {
            Some(meter_id) => self.store.get_meter(org, meter_id).await?,
            None => None,
        };

        Ok(BalanceStatement {
            organization_id: *org,
            booking_number: booking_number.clone(),
            meter_id: booking.meter_id().cloned(),
            evaluated_at: now,
            balance,
            cutoff_reason,
            power_state: meter_record.as_ref().map(|m| m.power_state),
            last_shutdown_reason: meter_record.and_then(|m| m.last_shutdown_reason),
            extra_meters,
            allocation,
        })
    }

    /// Allocation for whichever booking holds `meter_id`; `None` when unowned.
    async fn meter_allocation(
        &self,
        org: &OrganizationId,
        meter_id: &MeterId,
        now: DateTime<Utc>,
    ) -> Result<Option<Allocation>> {
        match self.store.meter_ownership(org, meter_id).await? {
            Some(ownership) => Ok(Some(
                self.statement(org, ownership.booking(), now)
                    .await?
                    .allocation,
            )),
            None => Ok(None),
        }
    }

    /// Record a purchase or staff grant. Bookings are created on first use.
    pub async fn create_package(
        &self,
        org: &OrganizationId,
        booking_number: &BookingNumber,
        request: PackageRequest,
        now: DateTime<Utc>,
    ) -> Result<PackagePurchase> {
        request.validate(&self.settings.package_limits())?;
        let settings = self.organization_settings(org).await?;
        let price = quote_price(&request, settings.basis_price_per_unit)?;

        let mut tx = self.store.begin().await?;
        let booking = match tx.lock_booking(org, booking_number).await? {
            Some(booking) => booking,
            None => {
                let kind = match request.category {
                    PackageCategory::Start => CustomerKind::Seasonal,
                    _ => CustomerKind::Transient,
                };
                let booking = Booking::new(*org, booking_number.clone(), kind);
                tx.upsert_booking(&booking).await?;
                debug!(booking = %booking_number, kind = %kind, "booking created");
                booking
            }
        };

        let start_energy = match (request.category.is_main(), booking.meter_id()) {
            (true, Some(meter_id)) => self.readings.latest(meter_id).await?.map(|r| r.energy),
            _ => None,
        };

        let package = request.into_package(
            *org,
            booking_number.clone(),
            booking.customer_kind,
            start_energy,
            now,
        );
        tx.insert_package(&package).await?;
        tx.commit().await?;

        info!(
            booking = %booking_number,
            package = %package.id,
            category = %package.category,
            units = %package.units,
            grant = package.is_grant(),
            price = %price,
            "package created"
        );
        Ok(PackagePurchase { package, price })
    }

    pub async fn assign_meter(
        &self,
        org: &OrganizationId,
        booking_number: &BookingNumber,
        meter_id: &MeterId,
        now: DateTime<Utc>,
    ) -> Result<AssignmentOutcome> {
        self.assignments
            .assign_meter(org, booking_number, meter_id, now)
            .await
    }

    pub async fn attach_extra_meter(
        &self,
        org: &OrganizationId,
        booking_number: &BookingNumber,
        meter_id: &MeterId,
        now: DateTime<Utc>,
    ) -> Result<ExtraMeter> {
        self.assignments
            .attach_extra_meter(org, booking_number, meter_id, now)
            .await
    }

    pub async fn detach_extra_meter(
        &self,
        org: &OrganizationId,
        booking_number: &BookingNumber,
        meter_id: &MeterId,
        now: DateTime<Utc>,
    ) -> Result<DetachedMeter> {
        self.assignments
            .detach_extra_meter(org, booking_number, meter_id, now)
            .await
    }

    pub async fn checkout(
        &self,
        org: &OrganizationId,
        booking_number: &BookingNumber,
    ) -> Result<CheckoutSummary> {
        self.assignments.checkout(org, booking_number).await
    }

    /// Switching off is always allowed; switching on needs a usable package.
    pub async fn request_power(
        &self,
        org: &OrganizationId,
        meter_id: &MeterId,
        value: PowerState,
        now: DateTime<Utc>,
    ) -> Result<PowerChange> {
        if value == PowerState::On {
            let allocation = self.meter_allocation(org, meter_id, now).await?;
            if let Some(reason) = PowerGuard::cutoff_reason(allocation.as_ref()) {
                info!(meter = %meter_id, reason = %reason, "power on refused");
                return Err(LedgerError::PowerRefused {
                    meter_id: meter_id.clone(),
                    reason,
                });
            }
        }

        let mut tx = self.store.begin().await?;
        let outcome = PowerCommandIssuer::issue(
            tx.as_mut(),
            &PowerCommand::set_state(*org, meter_id.clone(), value),
        )
        .await?;
        tx.commit().await?;

        Ok(PowerChange {
            meter_id: meter_id.clone(),
            value,
            outcome,
        })
    }

    /// Switch off every powered meter the guard would not allow ON.
    pub async fn enforce(&self, now: DateTime<Utc>) -> Result<EnforcementReport> {
        let powered = self.store.list_powered_meters().await?;
        let mut report = EnforcementReport {
            evaluated: powered.len(),
            ..Default::default()
        };

        for meter in powered {
            match self.enforce_meter(&meter.organization_id, &meter.meter_id, now).await {
                Ok(Some(reason)) => report.switched_off.push((meter.meter_id, reason)),
                Ok(None) => {}
                Err(e) => {
                    error!(meter = %meter.meter_id, error = %e, "enforcement failed for meter");
                    report.failed += 1;
                }
            }
        }

        if !report.switched_off.is_empty() {
            info!(
                evaluated = report.evaluated,
                switched_off = report.switched_off.len(),
                "enforcement sweep switched meters off"
            );
        }
        Ok(report)
    }

    async fn enforce_meter(
        &self,
        org: &OrganizationId,
        meter_id: &MeterId,
        now: DateTime<Utc>,
    ) -> Result<Option<ShutdownReason>> {
        let allocation = self.meter_allocation(org, meter_id, now).await?;
        let Some(reason) = PowerGuard::cutoff_reason(allocation.as_ref()) else {
            return Ok(None);
        };

        let mut tx = self.store.begin().await?;
        PowerCommandIssuer::issue(
            tx.as_mut(),
            &PowerCommand::off(*org, meter_id.clone(), Some(reason)),
        )
        .await?;
        tx.commit().await?;
        Ok(Some(reason))
    }

    pub async fn apply_shutdown_event(&self, event: &ShutdownEvent) -> Result<()> {
        let mut tx = self.store.begin().await?;
        PowerCommandIssuer::apply_feedback(tx.as_mut(), event).await?;
        tx.commit().await
    }

    /// Readings are keyed by device, so the meter must be known to `org`
    /// before its history is returned.
    pub async fn meter_history(
        &self,
        org: &OrganizationId,
        meter_id: &MeterId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MeterReading>> {
        if from > to {
            return Err(LedgerError::validation(
                "from",
                format!("history window starts after it ends ({from} > {to})"),
            ));
        }

        let registered = self.store.get_meter(org, meter_id).await?.is_some()
            || self.store.meter_ownership(org, meter_id).await?.is_some();
        if !registered {
            return Err(LedgerError::MeterNotFound {
                meter_id: meter_id.clone(),
            });
        }
        self.readings.history(meter_id, from, to).await
    }
}
