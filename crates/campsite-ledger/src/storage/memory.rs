//! In-process ledger store for development and tests
//!
//! Transactions take the single state mutex for their whole lifetime and work
//! on a staged copy, so they are fully serialised and a dropped transaction
//! leaves no trace. Do not call [`LedgerStore`] reads while holding a
//! transaction from the same store.

use crate::domain::commands::{CommandStatus, EnqueueOutcome, PowerCommand};
use crate::domain::meters::{
    Booking, ExtraMeter, MeterAssignment, MeterOwnership, MeterReading, MeterRecord,
};
use crate::domain::packages::Package;
use crate::domain::types::{
    BookingNumber, Kwh, MeterId, OrganizationId, PackageId, PowerState, ShutdownReason,
};
use crate::error::{LedgerError, Result};
use crate::storage::{LedgerStore, LedgerTransaction, MeterReadingSource, OrganizationSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCommand {
    pub id: u64,
    pub command: PowerCommand,
    pub status: CommandStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    pub bookings: BTreeMap<(OrganizationId, BookingNumber), Booking>,
    pub packages: BTreeMap<PackageId, Package>,
    pub meters: BTreeMap<(OrganizationId, MeterId), MeterRecord>,
    pub extra_meters: BTreeMap<(OrganizationId, MeterId), ExtraMeter>,
    pub commands: Vec<StoredCommand>,
    pub settings: HashMap<OrganizationId, OrganizationSettings>,
}

impl MemoryState {
    fn packages_for(&self, org: &OrganizationId, booking: &BookingNumber) -> Vec<Package> {
        let mut packages: Vec<Package> = self
            .packages
            .values()
            .filter(|p| &p.organization_id == org && &p.booking_number == booking)
            .cloned()
            .collect();
        packages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        packages
    }

    fn extra_meters_for(&self, org: &OrganizationId, booking: &BookingNumber) -> Vec<ExtraMeter> {
        self.extra_meters
            .values()
            .filter(|e| &e.organization_id == org && &e.booking_number == booking)
            .cloned()
            .collect()
    }

    fn ownership(&self, org: &OrganizationId, meter: &MeterId) -> Option<MeterOwnership> {
        let key = (*org, meter.clone());
        if let Some(extra) = self.extra_meters.get(&key) {
            return Some(MeterOwnership::Extra(extra.booking_number.clone()));
        }
        self.meters
            .get(&key)
            .and_then(|m| m.owner.clone())
            .map(MeterOwnership::Primary)
    }

    fn meter_mut(&mut self, org: &OrganizationId, meter: &MeterId) -> &mut MeterRecord {
        self.meters
            .entry((*org, meter.clone()))
            .or_insert_with(|| MeterRecord::new(*org, meter.clone()))
    }

    pub fn pending_commands(&self) -> Vec<&PowerCommand> {
        self.commands
            .iter()
            .filter(|c| c.status == CommandStatus::Pending)
            .map(|c| &c.command)
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    readings: Arc<RwLock<HashMap<MeterId, Vec<MeterReading>>>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn insert_booking(&self, booking: Booking) {
        let mut state = self.state.lock().await;
        if let Some(assignment) = &booking.meter {
            state
                .meter_mut(&booking.organization_id, &assignment.meter_id)
                .owner = Some(booking.booking_number.clone());
        }
        state.bookings.insert(
            (booking.organization_id, booking.booking_number.clone()),
            booking,
        );
    }

    pub async fn insert_package(&self, package: Package) {
        self.state.lock().await.packages.insert(package.id, package);
    }

    pub async fn register_meter(&self, record: MeterRecord) {
        self.state
            .lock()
            .await
            .meters
            .insert((record.organization_id, record.meter_id.clone()), record);
    }

    pub async fn set_settings(&self, org: OrganizationId, settings: OrganizationSettings) {
        self.state.lock().await.settings.insert(org, settings);
    }

    pub async fn record_reading(&self, reading: MeterReading) {
        let mut readings = self.readings.write().await;
        let samples = readings.entry(reading.meter_id.clone()).or_default();
        samples.push(reading);
        samples.sort_by_key(|r| r.time);
    }

    /// Make the next commit fail, for exercising rollback paths.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MeterReadingSource for MemoryStore {
    async fn latest(&self, meter_id: &MeterId) -> Result<Option<MeterReading>> {
        Ok(self
            .readings
            .read()
            .await
            .get(meter_id)
            .and_then(|samples| samples.last().cloned()))
    }

    async fn history(
        &self,
        meter_id: &MeterId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MeterReading>> {
        Ok(self
            .readings
            .read()
            .await
            .get(meter_id)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|r| r.time >= from && r.time <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            fail_commit: self.fail_next_commit.clone(),
        }))
    }

    async fn get_booking(
        &self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Option<Booking>> {
        Ok(self
            .state
            .lock()
            .await
            .bookings
            .get(&(*org, booking.clone()))
            .cloned())
    }

    async fn list_packages(
        &self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<Package>> {
        Ok(self.state.lock().await.packages_for(org, booking))
    }

    async fn list_extra_meters(
        &self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<ExtraMeter>> {
        Ok(self.state.lock().await.extra_meters_for(org, booking))
    }

    async fn get_meter(&self, org: &OrganizationId, meter: &MeterId) -> Result<Option<MeterRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .meters
            .get(&(*org, meter.clone()))
            .cloned())
    }

    async fn meter_ownership(
        &self,
        org: &OrganizationId,
        meter: &MeterId,
    ) -> Result<Option<MeterOwnership>> {
        Ok(self.state.lock().await.ownership(org, meter))
    }

    async fn list_powered_meters(&self) -> Result<Vec<MeterRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .meters
            .values()
            .filter(|m| m.power_state == PowerState::On)
            .cloned()
            .collect())
    }

    async fn settings(&self, org: &OrganizationId) -> Result<Option<OrganizationSettings>> {
        Ok(self.state.lock().await.settings.get(org).cloned())
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_commit: Arc<AtomicBool>,
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn lock_booking(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Option<Booking>> {
        Ok(self.working.bookings.get(&(*org, booking.clone())).cloned())
    }

    async fn upsert_booking(&mut self, booking: &Booking) -> Result<()> {
        self.working.bookings.insert(
            (booking.organization_id, booking.booking_number.clone()),
            booking.clone(),
        );
        Ok(())
    }

    async fn set_booking_meter(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
        assignment: Option<&MeterAssignment>,
    ) -> Result<()> {
        let record = self
            .working
            .bookings
            .get_mut(&(*org, booking.clone()))
            .ok_or_else(|| LedgerError::BookingNotFound {
                booking: booking.clone(),
            })?;
        record.meter = assignment.cloned();
        Ok(())
    }

    async fn packages(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<Package>> {
        Ok(self.working.packages_for(org, booking))
    }

    async fn insert_package(&mut self, package: &Package) -> Result<()> {
        self.working.packages.insert(package.id, package.clone());
        Ok(())
    }

    async fn update_package_carry_over(
        &mut self,
        id: &PackageId,
        accumulated_usage: Kwh,
        start_energy: Option<Kwh>,
    ) -> Result<()> {
        let package = self.working.packages.get_mut(id).ok_or_else(|| {
            LedgerError::validation("package_id", format!("package {id} does not exist"))
        })?;
        package.accumulated_usage = accumulated_usage;
        package.start_energy = start_energy;
        Ok(())
    }

    async fn delete_packages(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<u64> {
        let before = self.working.packages.len();
        self.working
            .packages
            .retain(|_, p| !(&p.organization_id == org && &p.booking_number == booking));
        Ok((before - self.working.packages.len()) as u64)
    }

    async fn meter_ownership(
        &mut self,
        org: &OrganizationId,
        meter: &MeterId,
    ) -> Result<Option<MeterOwnership>> {
        Ok(self.working.ownership(org, meter))
    }

    async fn set_meter_owner(
        &mut self,
        org: &OrganizationId,
        meter: &MeterId,
        owner: Option<&BookingNumber>,
    ) -> Result<()> {
        let record = self.working.meter_mut(org, meter);
        record.owner = owner.cloned();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn extra_meters(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<ExtraMeter>> {
        Ok(self.working.extra_meters_for(org, booking))
    }

    async fn insert_extra_meter(&mut self, extra: &ExtraMeter) -> Result<()> {
        self.working.meter_mut(&extra.organization_id, &extra.meter_id);
        self.working.extra_meters.insert(
            (extra.organization_id, extra.meter_id.clone()),
            extra.clone(),
        );
        Ok(())
    }

    async fn delete_extra_meter(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
        meter: &MeterId,
    ) -> Result<bool> {
        let key = (*org, meter.clone());
        match self.working.extra_meters.get(&key) {
            Some(extra) if &extra.booking_number == booking => {
                self.working.extra_meters.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn enqueue_command(&mut self, command: &PowerCommand) -> Result<EnqueueOutcome> {
        let mut already_pending = false;
        for stored in self.working.commands.iter_mut().filter(|c| {
            c.status == CommandStatus::Pending
                && c.command.organization_id == command.organization_id
                && c.command.meter_id == command.meter_id
        }) {
            if stored.command.value == command.value {
                already_pending = true;
            } else {
                stored.status = CommandStatus::Superseded;
            }
        }

        if already_pending {
            return Ok(EnqueueOutcome::AlreadyPending);
        }

        let id = self.working.commands.len() as u64 + 1;
        self.working.commands.push(StoredCommand {
            id,
            command: command.clone(),
            status: CommandStatus::Pending,
        });
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn set_power_state(
        &mut self,
        org: &OrganizationId,
        meter: &MeterId,
        state: PowerState,
        reason: Option<ShutdownReason>,
    ) -> Result<()> {
        let record = self.working.meter_mut(org, meter);
        record.power_state = state;
        record.last_shutdown_reason = reason;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            mut guard,
            working,
            fail_commit,
        } = *self;

        if fail_commit.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::Database {
                operation: "commit".to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected commit failure",
                )),
            });
        }

        *guard = working;
        Ok(())
    }
}
