#![allow(dead_code)]

use campsite_ledger::config::LedgerSettings;
use campsite_ledger::domain::{
    Booking, BookingNumber, CustomerKind, Kwh, LedgerService, MeterAssignment, MeterId,
    MeterReading, OrganizationId, Package, PackageCategory, PackageRequest, PowerState,
};
use campsite_ledger::storage::MemoryStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

pub fn kwh(value: Decimal) -> Kwh {
    Kwh::from_decimal(value)
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()
}

pub fn ledger(store: &MemoryStore) -> LedgerService {
    LedgerService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        LedgerSettings::default(),
    )
}

pub async fn record(store: &MemoryStore, meter: &MeterId, energy: Decimal, time: DateTime<Utc>) {
    store
        .record_reading(MeterReading {
            meter_id: meter.clone(),
            time,
            energy: kwh(energy),
            power: 0.0,
            voltage: 230.0,
            current: 0.0,
            state: PowerState::On,
            online: true,
        })
        .await;
}

/// Booking already on `meter`, measured from `start`.
pub async fn seat_booking(
    store: &MemoryStore,
    org: OrganizationId,
    booking: &str,
    meter: &MeterId,
    start: Decimal,
) -> BookingNumber {
    let number = BookingNumber::new(booking);
    let mut record = Booking::new(org, number.clone(), CustomerKind::Transient);
    record.meter = Some(MeterAssignment {
        meter_id: meter.clone(),
        start_energy: kwh(start),
        start_time: base_time(),
    });
    store.insert_booking(record).await;
    number
}

pub async fn add_package(
    store: &MemoryStore,
    org: OrganizationId,
    booking: &BookingNumber,
    category: PackageCategory,
    units: Decimal,
    start_energy: Option<Decimal>,
    created_at: DateTime<Utc>,
) -> Package {
    let package = PackageRequest {
        category,
        units: kwh(units),
        payment_method: "card".to_string(),
        duration_hours: category.is_main().then_some(24),
    }
    .into_package(
        org,
        booking.clone(),
        CustomerKind::Transient,
        start_energy.map(kwh),
        created_at,
    );
    store.insert_package(package.clone()).await;
    package
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}
