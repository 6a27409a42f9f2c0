//! Waterfall allocation of measured usage across a booking's packages
//!
//! Every call site that shows or acts on a balance goes through
//! [`ConsumptionAllocator::allocate`]. The function is pure: identical inputs
//! give identical output.

use crate::domain::expiry::{ExpiryEvaluator, ExpiryState, PackageExpiry};
use crate::domain::packages::Package;
use crate::domain::types::{Kwh, MeterId, PackageCategory, PackageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Clamped usage of one extra meter since it was attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraMeterUsage {
    pub meter_id: MeterId,
    pub usage: Kwh,
}

impl ExtraMeterUsage {
    /// Measure an extra meter. A missing reading counts as zero, a counter
    /// below its start energy is clamped to zero and reported.
    pub fn measure(
        meter_id: &MeterId,
        start_energy: Kwh,
        energy_now: Option<Kwh>,
    ) -> (Self, Option<UsageAnomaly>) {
        let (usage, anomaly) = measure_usage(meter_id, start_energy, energy_now);
        (
            Self {
                meter_id: meter_id.clone(),
                usage,
            },
            anomaly,
        )
    }
}

/// Non-fatal condition surfaced to operators instead of being billed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageAnomaly {
    /// Counter below its reference: hardware reset or an unrecorded swap.
    CounterRegression {
        meter_id: MeterId,
        reference: Kwh,
        observed: Kwh,
    },
    MissingReading {
        meter_id: MeterId,
    },
    StaleReading {
        meter_id: MeterId,
        last_seen: DateTime<Utc>,
    },
}

/// Usage on one meter since `reference`. A missing reading counts as zero, a
/// counter below its reference is clamped to zero; both are reported.
pub fn measure_usage(
    meter_id: &MeterId,
    reference: Kwh,
    energy_now: Option<Kwh>,
) -> (Kwh, Option<UsageAnomaly>) {
    match energy_now {
        None => (
            Kwh::zero(),
            Some(UsageAnomaly::MissingReading {
                meter_id: meter_id.clone(),
            }),
        ),
        Some(observed) => match observed.delta_since(reference) {
            Some(delta) => (delta, None),
            None => (
                Kwh::zero(),
                Some(UsageAnomaly::CounterRegression {
                    meter_id: meter_id.clone(),
                    reference,
                    observed,
                }),
            ),
        },
    }
}

/// Derived package state. Never read from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveState {
    Active,
    Exhausted,
    Expired,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAllocation {
    pub package_id: PackageId,
    pub category: PackageCategory,
    pub units: Kwh,
    pub usage: Kwh,
    pub remaining: Kwh,
    pub state: EffectiveState,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PackageAllocation {
    pub fn participates(&self) -> bool {
        matches!(
            self.state,
            EffectiveState::Active | EffectiveState::Exhausted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub effective_start_energy: Option<Kwh>,
    pub carried_usage: Kwh,
    pub meter_usage: Kwh,
    pub extra_meter_usage: Kwh,
    pub total_usage: Kwh,
    /// Participating packages in waterfall order, then the rest.
    pub packages: Vec<PackageAllocation>,
    pub anomalies: Vec<UsageAnomaly>,
}

impl Allocation {
    pub fn participating(&self) -> impl Iterator<Item = &PackageAllocation> {
        self.packages.iter().filter(|p| p.participates())
    }

    pub fn participating_count(&self) -> usize {
        self.participating().count()
    }

    pub fn total_units(&self) -> Kwh {
        self.participating().map(|p| p.units).sum()
    }

    pub fn allocated_usage(&self) -> Kwh {
        self.participating().map(|p| p.usage).sum()
    }

    pub fn remaining(&self) -> Kwh {
        self.total_units().saturating_sub(self.allocated_usage())
    }

    pub fn get(&self, package_id: &PackageId) -> Option<&PackageAllocation> {
        self.packages.iter().find(|p| &p.package_id == package_id)
    }
}

/// Where usage on the current meter is measured from, and what was carried in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePoint {
    pub start_energy: Option<Kwh>,
    pub carried_usage: Kwh,
    /// Effectively active packages, in waterfall order.
    pub participating: Vec<PackageId>,
}

pub struct AllocationInput<'a> {
    pub packages: &'a [Package],
    pub primary_meter: Option<&'a MeterId>,
    /// Single snapshot of the primary meter counter; `None` when missing.
    pub current_meter_energy: Option<Kwh>,
    pub meter_assignment_start_energy: Option<Kwh>,
    pub extra_meter_usages: &'a [ExtraMeterUsage],
    pub now: DateTime<Utc>,
}

pub struct ConsumptionAllocator;

impl ConsumptionAllocator {
    pub fn allocate(input: &AllocationInput<'_>) -> Allocation {
        let expiry = ExpiryEvaluator::evaluate(input.packages, input.now);
        let ordered = waterfall_order(input.packages, &expiry);

        if ordered.is_empty() {
            // No grant to draw from: report zero rather than metering the counter.
            return Allocation {
                effective_start_energy: None,
                carried_usage: Kwh::zero(),
                meter_usage: Kwh::zero(),
                extra_meter_usage: Kwh::zero(),
                total_usage: Kwh::zero(),
                packages: non_participating(input.packages, &expiry),
                anomalies: Vec::new(),
            };
        }

        let reference = reference_from_order(&ordered, input.meter_assignment_start_energy);
        let mut anomalies = Vec::new();

        let meter_usage = match (input.primary_meter, reference.start_energy) {
            (Some(meter_id), Some(start)) => {
                let (usage, anomaly) = measure_usage(meter_id, start, input.current_meter_energy);
                anomalies.extend(anomaly);
                usage
            }
            _ => Kwh::zero(),
        };
        let extra_meter_usage: Kwh = input.extra_meter_usages.iter().map(|e| e.usage).sum();
        let total_usage = reference.carried_usage + meter_usage + extra_meter_usage;

        let units: Vec<Kwh> = ordered.iter().map(|p| p.units).collect();
        let drawn = waterfall(total_usage, &units);

        let mut packages: Vec<PackageAllocation> = ordered
            .iter()
            .zip(drawn)
            .map(|(package, usage)| {
                let remaining = package.units.saturating_sub(usage);
                PackageAllocation {
                    package_id: package.id,
                    category: package.category,
                    units: package.units,
                    usage,
                    remaining,
                    state: if remaining.is_zero() {
                        EffectiveState::Exhausted
                    } else {
                        EffectiveState::Active
                    },
                    created_at: package.created_at,
                    expires_at: package.expires_at(),
                }
            })
            .collect();
        packages.extend(non_participating(input.packages, &expiry));

        Allocation {
            effective_start_energy: reference.start_energy,
            carried_usage: reference.carried_usage,
            meter_usage,
            extra_meter_usage,
            total_usage,
            packages,
            anomalies,
        }
    }

    /// Tie-break rule: the oldest active day/start package's own start energy
    /// when set, else the booking's meter-assignment start energy.
    pub fn reference_point(
        packages: &[Package],
        now: DateTime<Utc>,
        meter_assignment_start_energy: Option<Kwh>,
    ) -> ReferencePoint {
        let expiry = ExpiryEvaluator::evaluate(packages, now);
        let ordered = waterfall_order(packages, &expiry);
        reference_from_order(&ordered, meter_assignment_start_energy)
    }
}

/// Greedy distribution of `total` over `units` in order.
///
/// `Σ result = min(total, Σ units)` and `0 ≤ result[i] ≤ units[i]`.
pub fn waterfall(total: Kwh, units: &[Kwh]) -> Vec<Kwh> {
    let mut left = total;
    units
        .iter()
        .map(|&budget| {
            let usage = left.min(budget);
            left = left.saturating_sub(usage);
            usage
        })
        .collect()
}

fn waterfall_order<'a>(packages: &'a [Package], expiry: &[PackageExpiry]) -> Vec<&'a Package> {
    let mut ordered: Vec<&Package> = packages
        .iter()
        .zip(expiry)
        .filter(|(_, e)| e.is_effectively_active())
        .map(|(p, _)| p)
        .collect();
    ordered.sort_by(|a, b| compare_for_waterfall(a, b));
    ordered
}

fn compare_for_waterfall(a: &Package, b: &Package) -> Ordering {
    b.category
        .is_main()
        .cmp(&a.category.is_main())
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

fn reference_from_order(
    ordered: &[&Package],
    meter_assignment_start_energy: Option<Kwh>,
) -> ReferencePoint {
    let main = ordered.iter().find(|p| p.category.is_main());

    let start_energy = main
        .and_then(|p| p.own_start_energy())
        .or(meter_assignment_start_energy);

    // Every package active at a move received the same carry-over, so it is
    // counted once: from the reference package, or the largest add-on value.
    let carried_usage = match main {
        Some(p) => p.accumulated_usage,
        None => ordered
            .iter()
            .map(|p| p.accumulated_usage)
            .max()
            .unwrap_or_else(Kwh::zero),
    };

    ReferencePoint {
        start_energy,
        carried_usage,
        participating: ordered.iter().map(|p| p.id).collect(),
    }
}

fn non_participating(packages: &[Package], expiry: &[PackageExpiry]) -> Vec<PackageAllocation> {
    let mut rest: Vec<PackageAllocation> = packages
        .iter()
        .zip(expiry)
        .filter(|(_, e)| !e.is_effectively_active())
        .map(|(package, e)| PackageAllocation {
            package_id: package.id,
            category: package.category,
            units: package.units,
            usage: Kwh::zero(),
            remaining: Kwh::zero(),
            state: if e.state == ExpiryState::Expired {
                EffectiveState::Expired
            } else {
                EffectiveState::Inactive
            },
            created_at: package.created_at,
            expires_at: package.expires_at(),
        })
        .collect();
    rest.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.package_id.cmp(&b.package_id)));
    rest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BookingNumber, CustomerKind, OrganizationId, PackageStatus};
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn kwh(value: Decimal) -> Kwh {
        Kwh::from_decimal(value)
    }

    fn package(
        category: PackageCategory,
        units: Decimal,
        created_at: DateTime<Utc>,
        start_energy: Option<Decimal>,
    ) -> Package {
        Package {
            id: PackageId::new(),
            organization_id: OrganizationId::new(),
            booking_number: BookingNumber::new("B-100"),
            category,
            units: kwh(units),
            payment_method: "card".to_string(),
            customer_kind: CustomerKind::Transient,
            start_energy: start_energy.map(kwh),
            accumulated_usage: Kwh::zero(),
            duration_hours: category.is_main().then_some(24),
            status: PackageStatus::Active,
            created_at,
        }
    }

    fn allocate(
        packages: &[Package],
        energy: Option<Decimal>,
        assignment_start: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Allocation {
        let meter = MeterId::new("M-1");
        ConsumptionAllocator::allocate(&AllocationInput {
            packages,
            primary_meter: Some(&meter),
            current_meter_energy: energy.map(kwh),
            meter_assignment_start_energy: assignment_start.map(kwh),
            extra_meter_usages: &[],
            now,
        })
    }

    #[test]
    fn test_single_day_package_draws_from_its_own_start() {
        let now = Utc::now();
        let day = package(PackageCategory::Day, dec!(10), now, Some(dec!(100)));

        let allocation = allocate(&[day.clone()], Some(dec!(105)), Some(dec!(40)), now);
        let drawn = allocation.get(&day.id).unwrap();

        assert_eq!(drawn.usage, kwh(dec!(5)));
        assert_eq!(drawn.remaining, kwh(dec!(5)));
        assert_eq!(allocation.remaining(), kwh(dec!(5)));
        assert_eq!(allocation.effective_start_energy, Some(kwh(dec!(100))));
    }

    #[test]
    fn test_day_package_is_drained_before_add_on() {
        let now = Utc::now();
        let add_on = package(PackageCategory::AddOn, dec!(10), now - Duration::hours(3), None);
        let day = package(
            PackageCategory::Day,
            dec!(5),
            now - Duration::hours(1),
            Some(dec!(100)),
        );

        let allocation = allocate(&[add_on.clone(), day.clone()], Some(dec!(112)), None, now);

        let day_drawn = allocation.get(&day.id).unwrap();
        assert_eq!(day_drawn.usage, kwh(dec!(5)));
        assert_eq!(day_drawn.remaining, Kwh::zero());
        assert_eq!(day_drawn.state, EffectiveState::Exhausted);

        let add_on_drawn = allocation.get(&add_on.id).unwrap();
        assert_eq!(add_on_drawn.usage, kwh(dec!(7)));
        assert_eq!(add_on_drawn.remaining, kwh(dec!(3)));
        assert_eq!(allocation.packages[0].package_id, day.id);
    }

    #[test]
    fn test_add_ons_are_consumed_in_purchase_order() {
        let now = Utc::now();
        let later = package(PackageCategory::AddOn, dec!(4), now - Duration::hours(1), None);
        let earlier = package(PackageCategory::AddOn, dec!(4), now - Duration::hours(2), None);

        let allocation = allocate(&[later.clone(), earlier.clone()], Some(dec!(5)), Some(dec!(0)), now);

        assert_eq!(allocation.get(&earlier.id).unwrap().usage, kwh(dec!(4)));
        assert_eq!(allocation.get(&later.id).unwrap().usage, kwh(dec!(1)));
    }

    #[test]
    fn test_missing_package_start_falls_back_to_assignment_start() {
        let now = Utc::now();
        let day = package(PackageCategory::Day, dec!(10), now, None);
        let zero_start = package(PackageCategory::Day, dec!(10), now, Some(dec!(0)));

        let allocation = allocate(&[day], Some(dec!(53)), Some(dec!(50)), now);
        assert_eq!(allocation.meter_usage, kwh(dec!(3)));

        let allocation = allocate(&[zero_start], Some(dec!(53)), Some(dec!(50)), now);
        assert_eq!(allocation.effective_start_energy, Some(kwh(dec!(50))));
    }

    #[test]
    fn test_no_packages_reports_zero_usage() {
        let allocation = allocate(&[], Some(dec!(900)), Some(dec!(10)), Utc::now());

        assert_eq!(allocation.total_usage, Kwh::zero());
        assert_eq!(allocation.remaining(), Kwh::zero());
        assert_eq!(allocation.participating_count(), 0);
        assert!(allocation.anomalies.is_empty());
    }

    #[test]
    fn test_expired_packages_do_not_absorb_usage() {
        let now = Utc::now();
        let expired = package(
            PackageCategory::Day,
            dec!(10),
            now - Duration::hours(48),
            Some(dec!(10)),
        );
        let current = package(PackageCategory::Day, dec!(10), now, Some(dec!(20)));

        let allocation = allocate(&[expired.clone(), current.clone()], Some(dec!(26)), None, now);

        assert_eq!(allocation.get(&current.id).unwrap().usage, kwh(dec!(6)));
        let expired_drawn = allocation.get(&expired.id).unwrap();
        assert_eq!(expired_drawn.state, EffectiveState::Expired);
        assert_eq!(expired_drawn.usage, Kwh::zero());
        assert_eq!(allocation.total_units(), kwh(dec!(10)));
    }

    #[test]
    fn test_counter_regression_is_clamped_and_reported() {
        let now = Utc::now();
        let day = package(PackageCategory::Day, dec!(10), now, Some(dec!(100)));

        let allocation = allocate(&[day], Some(dec!(3)), None, now);

        assert_eq!(allocation.meter_usage, Kwh::zero());
        assert_eq!(
            allocation.anomalies,
            vec![UsageAnomaly::CounterRegression {
                meter_id: MeterId::new("M-1"),
                reference: kwh(dec!(100)),
                observed: kwh(dec!(3)),
            }]
        );
    }

    #[test]
    fn test_missing_reading_counts_as_zero() {
        let now = Utc::now();
        let day = package(PackageCategory::Day, dec!(10), now, Some(dec!(100)));

        let allocation = allocate(&[day], None, None, now);

        assert_eq!(allocation.total_usage, Kwh::zero());
        assert_eq!(allocation.remaining(), kwh(dec!(10)));
        assert!(matches!(
            allocation.anomalies.as_slice(),
            [UsageAnomaly::MissingReading { .. }]
        ));
    }

    #[test]
    fn test_extra_meters_and_carry_over_are_pooled() {
        let now = Utc::now();
        let mut day = package(PackageCategory::Day, dec!(20), now, Some(dec!(200)));
        day.accumulated_usage = kwh(dec!(50));
        let mut add_on = package(PackageCategory::AddOn, dec!(100), now, None);
        add_on.accumulated_usage = kwh(dec!(50));

        let (extra, anomaly) =
            ExtraMeterUsage::measure(&MeterId::new("M-2"), kwh(dec!(10)), Some(kwh(dec!(12.5))));
        assert!(anomaly.is_none());

        let meter = MeterId::new("M-1");
        let allocation = ConsumptionAllocator::allocate(&AllocationInput {
            packages: &[day.clone(), add_on.clone()],
            primary_meter: Some(&meter),
            current_meter_energy: Some(kwh(dec!(201))),
            meter_assignment_start_energy: Some(kwh(dec!(200))),
            extra_meter_usages: &[extra],
            now,
        });

        assert_eq!(allocation.carried_usage, kwh(dec!(50)));
        assert_eq!(allocation.total_usage, kwh(dec!(53.5)));
        assert_eq!(allocation.get(&day.id).unwrap().usage, kwh(dec!(20)));
        assert_eq!(allocation.get(&add_on.id).unwrap().usage, kwh(dec!(33.5)));
    }

    #[test]
    fn test_extra_meter_regression_is_clamped() {
        let (extra, anomaly) =
            ExtraMeterUsage::measure(&MeterId::new("M-2"), kwh(dec!(10)), Some(kwh(dec!(2))));
        assert_eq!(extra.usage, Kwh::zero());
        assert!(matches!(
            anomaly,
            Some(UsageAnomaly::CounterRegression { .. })
        ));
    }

    #[test]
    fn test_waterfall_stops_at_total_units() {
        let drawn = waterfall(
            kwh(dec!(100)),
            &[kwh(dec!(5)), kwh(dec!(10)), kwh(dec!(2.5))],
        );
        assert_eq!(drawn, vec![kwh(dec!(5)), kwh(dec!(10)), kwh(dec!(2.5))]);

        let drawn = waterfall(kwh(dec!(6)), &[kwh(dec!(5)), kwh(dec!(10))]);
        assert_eq!(drawn, vec![kwh(dec!(5)), kwh(dec!(1))]);
    }
}
