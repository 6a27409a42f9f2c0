//! Property tests for the consumption waterfall
//!
//! - Usage is conserved: what the waterfall hands out equals what was
//!   measured, capped at the total units
//! - No package absorbs more than its units or less than zero
//! - Allocation is a pure function of its input
//! - The low-balance flag agrees with the remaining balance

use campsite_ledger::domain::allocator::{waterfall, AllocationInput, ConsumptionAllocator};
use campsite_ledger::domain::{
    BookingNumber, CustomerKind, ExtraMeterUsage, Kwh, LowBalanceMonitor, MeterId,
    OrganizationId, Package, PackageCategory, PackageRequest,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn kwh_cents(cents: u32) -> Kwh {
    Kwh::from_decimal(Decimal::new(i64::from(cents), 2))
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()
}

/// (is_main, units in cents, minutes after base time, own start energy in cents)
fn arb_package() -> impl Strategy<Value = (bool, u32, i64, Option<u32>)> {
    (
        any::<bool>(),
        1u32..200_000,
        0i64..600,
        prop::option::of(1u32..1_000_000),
    )
}

fn build_packages(specs: &[(bool, u32, i64, Option<u32>)]) -> Vec<Package> {
    let org = OrganizationId::new();
    specs
        .iter()
        .map(|&(is_main, units, offset, start)| {
            let category = if is_main {
                PackageCategory::Day
            } else {
                PackageCategory::AddOn
            };
            PackageRequest {
                category,
                units: kwh_cents(units),
                payment_method: "card".to_string(),
                duration_hours: is_main.then_some(48),
            }
            .into_package(
                org,
                BookingNumber::new("B-PROP"),
                CustomerKind::Transient,
                start.filter(|_| is_main).map(kwh_cents),
                base_time() + Duration::minutes(offset),
            )
        })
        .collect()
}

proptest! {
    /// Property: the waterfall never creates or loses energy
    #[test]
    fn prop_waterfall_conserves_usage(
        total in 0u32..2_000_000,
        units in prop::collection::vec(1u32..200_000, 0..8),
    ) {
        let total = kwh_cents(total);
        let units: Vec<Kwh> = units.into_iter().map(kwh_cents).collect();

        let drawn = waterfall(total, &units);
        let sum_units: Kwh = units.iter().copied().sum();
        let sum_drawn: Kwh = drawn.iter().copied().sum();

        prop_assert_eq!(drawn.len(), units.len());
        prop_assert_eq!(sum_drawn, total.min(sum_units));
        for (usage, budget) in drawn.iter().zip(&units) {
            prop_assert!(*usage <= *budget);
        }
    }

    /// Property: a later package only draws once every earlier one is full
    #[test]
    fn prop_waterfall_fills_in_order(
        total in 0u32..2_000_000,
        units in prop::collection::vec(1u32..200_000, 1..8),
    ) {
        let units: Vec<Kwh> = units.into_iter().map(kwh_cents).collect();
        let drawn = waterfall(kwh_cents(total), &units);

        for i in 1..drawn.len() {
            if drawn[i].is_positive() {
                prop_assert_eq!(drawn[i - 1], units[i - 1]);
            }
        }
    }

    /// Property: allocation totals line up with the measured usage
    #[test]
    fn prop_allocation_is_bounded_and_conserved(
        specs in prop::collection::vec(arb_package(), 0..6),
        assignment_start in 0u32..1_000_000,
        meter_delta in 0u32..500_000,
        extra in prop::collection::vec(0u32..50_000, 0..3),
        elapsed_hours in 0i64..72,
    ) {
        let packages = build_packages(&specs);
        let meter = MeterId::new("M-PROP");
        let extras: Vec<ExtraMeterUsage> = extra
            .iter()
            .enumerate()
            .map(|(i, usage)| ExtraMeterUsage {
                meter_id: MeterId::new(format!("X-{i}")),
                usage: kwh_cents(*usage),
            })
            .collect();
        let now = base_time() + Duration::hours(elapsed_hours);

        let allocation = ConsumptionAllocator::allocate(&AllocationInput {
            packages: &packages,
            primary_meter: Some(&meter),
            current_meter_energy: Some(kwh_cents(assignment_start + meter_delta)),
            meter_assignment_start_energy: Some(kwh_cents(assignment_start)),
            extra_meter_usages: &extras,
            now,
        });

        prop_assert_eq!(
            allocation.total_usage,
            allocation.carried_usage + allocation.meter_usage + allocation.extra_meter_usage
        );
        prop_assert_eq!(
            allocation.allocated_usage(),
            allocation.total_usage.min(allocation.total_units())
        );
        for package in &allocation.packages {
            prop_assert!(package.usage <= package.units);
            if !package.participates() {
                prop_assert!(package.usage.is_zero());
            }
        }
        prop_assert_eq!(allocation.packages.len(), packages.len());
    }

    /// Property: identical inputs give identical allocations
    #[test]
    fn prop_allocation_is_deterministic(
        specs in prop::collection::vec(arb_package(), 0..6),
        energy in 0u32..2_000_000,
        elapsed_hours in 0i64..72,
    ) {
        let packages = build_packages(&specs);
        let meter = MeterId::new("M-PROP");
        let input = AllocationInput {
            packages: &packages,
            primary_meter: Some(&meter),
            current_meter_energy: Some(kwh_cents(energy)),
            meter_assignment_start_energy: Some(Kwh::zero()),
            extra_meter_usages: &[],
            now: base_time() + Duration::hours(elapsed_hours),
        };

        prop_assert_eq!(
            ConsumptionAllocator::allocate(&input),
            ConsumptionAllocator::allocate(&input)
        );
    }

    /// Property: low balance is flagged exactly when a participating
    /// allowance has at most the threshold left
    #[test]
    fn prop_low_balance_matches_remaining(
        specs in prop::collection::vec(arb_package(), 0..6),
        energy in 0u32..2_000_000,
        threshold in 0u32..10_000,
    ) {
        let packages = build_packages(&specs);
        let meter = MeterId::new("M-PROP");
        let allocation = ConsumptionAllocator::allocate(&AllocationInput {
            packages: &packages,
            primary_meter: Some(&meter),
            current_meter_energy: Some(kwh_cents(energy)),
            meter_assignment_start_energy: Some(Kwh::zero()),
            extra_meter_usages: &[],
            now: base_time() + Duration::hours(1),
        });

        let signal = LowBalanceMonitor::new(kwh_cents(threshold)).evaluate(&allocation);

        prop_assert_eq!(signal.remaining, allocation.remaining());
        prop_assert_eq!(
            signal.low_balance,
            allocation.participating_count() > 0 && signal.remaining <= kwh_cents(threshold)
        );
    }
}
