//! Persistence seams of the ledger
//!
//! Reads go through [`LedgerStore`]. Every write happens inside a
//! [`LedgerTransaction`]; dropping one without calling `commit` rolls it back.

pub mod connection;
pub mod memory;
pub mod postgres;

use crate::domain::commands::{EnqueueOutcome, PowerCommand};
use crate::domain::meters::{
    Booking, ExtraMeter, MeterAssignment, MeterOwnership, MeterReading, MeterRecord,
};
use crate::domain::packages::Package;
use crate::domain::types::{
    BookingNumber, Kwh, MeterId, OrganizationId, PackageId, PowerState, ShutdownReason,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use connection::ConnectionPool;
pub use memory::MemoryStore;
pub use postgres::{PgLedgerStore, PgReadingSource};

/// Organization-scoped settings, read-only to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationSettings {
    pub basis_price_per_unit: Decimal,
    pub low_balance_threshold: Kwh,
}

/// Telemetry from the device layer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeterReadingSource: Send + Sync {
    async fn latest(&self, meter_id: &MeterId) -> Result<Option<MeterReading>>;

    async fn history(
        &self,
        meter_id: &MeterId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MeterReading>>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;

    async fn get_booking(
        &self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Option<Booking>>;

    async fn list_packages(
        &self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<Package>>;

    async fn list_extra_meters(
        &self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<ExtraMeter>>;

    async fn get_meter(&self, org: &OrganizationId, meter: &MeterId) -> Result<Option<MeterRecord>>;

    async fn meter_ownership(
        &self,
        org: &OrganizationId,
        meter: &MeterId,
    ) -> Result<Option<MeterOwnership>>;

    /// Meters whose optimistic state is ON, across all organizations.
    async fn list_powered_meters(&self) -> Result<Vec<MeterRecord>>;

    async fn settings(&self, org: &OrganizationId) -> Result<Option<OrganizationSettings>>;
}

/// One unit of work. Implementations serialise concurrent transactions that
/// touch the same booking.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Lock the booking for the rest of the transaction.
    async fn lock_booking(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Option<Booking>>;

    async fn upsert_booking(&mut self, booking: &Booking) -> Result<()>;

    async fn set_booking_meter(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
        assignment: Option<&MeterAssignment>,
    ) -> Result<()>;

    async fn packages(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<Package>>;

    async fn insert_package(&mut self, package: &Package) -> Result<()>;

    async fn update_package_carry_over(
        &mut self,
        id: &PackageId,
        accumulated_usage: Kwh,
        start_energy: Option<Kwh>,
    ) -> Result<()>;

    async fn delete_packages(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<u64>;

    /// Lock the meter row and report who holds it.
    async fn meter_ownership(
        &mut self,
        org: &OrganizationId,
        meter: &MeterId,
    ) -> Result<Option<MeterOwnership>>;

    async fn set_meter_owner(
        &mut self,
        org: &OrganizationId,
        meter: &MeterId,
        owner: Option<&BookingNumber>,
    ) -> Result<()>;

    async fn extra_meters(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<ExtraMeter>>;

    async fn insert_extra_meter(&mut self, extra: &ExtraMeter) -> Result<()>;

    async fn delete_extra_meter(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
        meter: &MeterId,
    ) -> Result<bool>;

    /// Queue a device command. A pending command with the same value makes
    /// this a no-op; a pending opposite command is superseded.
    async fn enqueue_command(&mut self, command: &PowerCommand) -> Result<EnqueueOutcome>;

    async fn set_power_state(
        &mut self,
        org: &OrganizationId,
        meter: &MeterId,
        state: PowerState,
        reason: Option<ShutdownReason>,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
