use crate::domain::allocator::Allocation;
use crate::domain::types::{Kwh, ShutdownReason};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSignal {
    pub total_units: Kwh,
    pub used: Kwh,
    pub remaining: Kwh,
    pub threshold: Kwh,
    pub low_balance: bool,
}

/// Remaining prepaid balance and the purchase-prompt signal.
///
/// Low balance never cuts power by itself; see [`PowerGuard`] for that.
#[derive(Debug, Clone, Copy)]
pub struct LowBalanceMonitor {
    threshold: Kwh,
}

impl LowBalanceMonitor {
    pub fn new(threshold: Kwh) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Kwh {
        self.threshold
    }

    pub fn evaluate(&self, allocation: &Allocation) -> BalanceSignal {
        let total_units = allocation.total_units();
        let used = allocation.allocated_usage();
        let remaining = total_units.saturating_sub(used);

        BalanceSignal {
            total_units,
            used,
            remaining,
            threshold: self.threshold,
            low_balance: allocation.participating_count() > 0 && remaining <= self.threshold,
        }
    }
}

/// Decides whether a meter may stay powered.
pub struct PowerGuard;

impl PowerGuard {
    /// `allocation` is `None` when the meter belongs to no booking.
    pub fn cutoff_reason(allocation: Option<&Allocation>) -> Option<ShutdownReason> {
        let Some(allocation) = allocation else {
            return Some(ShutdownReason::NoCustomer);
        };

        if allocation.packages.is_empty() {
            Some(ShutdownReason::NoPackage)
        } else if allocation.participating_count() == 0 {
            Some(ShutdownReason::PackageExpired)
        } else if allocation.remaining().is_zero() {
            Some(ShutdownReason::UnitsExhausted)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::allocator::{EffectiveState, PackageAllocation};
    use crate::domain::types::{PackageCategory, PackageId};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn allocation(entries: &[(EffectiveState, Kwh, Kwh)]) -> Allocation {
        Allocation {
            effective_start_energy: None,
            carried_usage: Kwh::zero(),
            meter_usage: Kwh::zero(),
            extra_meter_usage: Kwh::zero(),
            total_usage: entries.iter().map(|(_, _, usage)| *usage).sum(),
            packages: entries
                .iter()
                .map(|(state, units, usage)| PackageAllocation {
                    package_id: PackageId::new(),
                    category: PackageCategory::Day,
                    units: *units,
                    usage: *usage,
                    remaining: units.saturating_sub(*usage),
                    state: *state,
                    created_at: Utc::now(),
                    expires_at: None,
                })
                .collect(),
            anomalies: Vec::new(),
        }
    }

    #[test]
    fn test_low_balance_at_threshold() {
        let monitor = LowBalanceMonitor::new(Kwh::from_decimal(dec!(5)));
        let signal = monitor.evaluate(&allocation(&[(
            EffectiveState::Active,
            Kwh::from_decimal(dec!(10)),
            Kwh::from_decimal(dec!(5)),
        )]));

        assert_eq!(signal.remaining, Kwh::from_decimal(dec!(5)));
        assert!(signal.low_balance);
    }

    #[test]
    fn test_no_active_packages_is_never_low_balance() {
        let monitor = LowBalanceMonitor::new(Kwh::from_decimal(dec!(5)));

        assert!(!monitor.evaluate(&allocation(&[])).low_balance);
        assert!(!monitor
            .evaluate(&allocation(&[(
                EffectiveState::Expired,
                Kwh::from_decimal(dec!(10)),
                Kwh::zero(),
            )]))
            .low_balance);
    }

    #[test]
    fn test_cutoff_reasons() {
        let ten = Kwh::from_decimal(dec!(10));

        assert_eq!(
            PowerGuard::cutoff_reason(None),
            Some(ShutdownReason::NoCustomer)
        );
        assert_eq!(
            PowerGuard::cutoff_reason(Some(&allocation(&[]))),
            Some(ShutdownReason::NoPackage)
        );
        assert_eq!(
            PowerGuard::cutoff_reason(Some(&allocation(&[(
                EffectiveState::Expired,
                ten,
                Kwh::zero()
            )]))),
            Some(ShutdownReason::PackageExpired)
        );
        assert_eq!(
            PowerGuard::cutoff_reason(Some(&allocation(&[(EffectiveState::Exhausted, ten, ten)]))),
            Some(ShutdownReason::UnitsExhausted)
        );
        assert_eq!(
            PowerGuard::cutoff_reason(Some(&allocation(&[(
                EffectiveState::Active,
                ten,
                Kwh::zero()
            )]))),
            None
        );
    }
}
