//! Time-based package expiry
//!
//! Expiry is derived from `created_at + duration_hours` on every read. The
//! stored `status` column is an audit marker only.

use crate::domain::packages::Package;
use crate::domain::types::PackageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryState {
    Active,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageExpiry {
    pub package_id: PackageId,
    pub state: ExpiryState,
    /// Add-on whose day/start package has run out.
    pub inactive: bool,
}

impl PackageExpiry {
    pub fn is_effectively_active(&self) -> bool {
        self.state == ExpiryState::Active && !self.inactive
    }
}

pub struct ExpiryEvaluator;

impl ExpiryEvaluator {
    pub fn state(package: &Package, now: DateTime<Utc>) -> ExpiryState {
        match package.expires_at() {
            Some(expires_at) if now >= expires_at => ExpiryState::Expired,
            _ => ExpiryState::Active,
        }
    }

    /// Evaluate every package of one booking, in input order.
    pub fn evaluate(packages: &[Package], now: DateTime<Utc>) -> Vec<PackageExpiry> {
        let mut has_main = false;
        let mut main_active = false;
        for package in packages.iter().filter(|p| p.category.is_main()) {
            has_main = true;
            main_active |= Self::state(package, now) == ExpiryState::Active;
        }
        let add_ons_inactive = has_main && !main_active;

        packages
            .iter()
            .map(|package| PackageExpiry {
                package_id: package.id,
                state: Self::state(package, now),
                inactive: !package.category.is_main() && add_ons_inactive,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{
        BookingNumber, CustomerKind, Kwh, OrganizationId, PackageCategory, PackageStatus,
    };
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn package(category: PackageCategory, created_at: DateTime<Utc>) -> Package {
        Package {
            id: crate::domain::types::PackageId::new(),
            organization_id: OrganizationId::new(),
            booking_number: BookingNumber::new("B-1"),
            category,
            units: Kwh::from_decimal(dec!(10)),
            payment_method: "card".to_string(),
            customer_kind: CustomerKind::Transient,
            start_energy: None,
            accumulated_usage: Kwh::zero(),
            duration_hours: category.is_main().then_some(24),
            status: PackageStatus::Active,
            created_at,
        }
    }

    #[test]
    fn test_day_package_expires_exactly_at_duration() {
        let created = Utc::now();
        let day = package(PackageCategory::Day, created);

        assert_eq!(
            ExpiryEvaluator::state(&day, created + Duration::hours(23)),
            ExpiryState::Active
        );
        assert_eq!(
            ExpiryEvaluator::state(&day, created + Duration::hours(24)),
            ExpiryState::Expired
        );
    }

    #[test]
    fn test_add_on_never_expires_by_duration() {
        let add_on = package(PackageCategory::AddOn, Utc::now() - Duration::days(400));
        assert_eq!(
            ExpiryEvaluator::state(&add_on, Utc::now()),
            ExpiryState::Active
        );
    }

    #[test]
    fn test_add_on_goes_inactive_with_expired_main_package() {
        let now = Utc::now();
        let packages = vec![
            package(PackageCategory::Day, now - Duration::hours(30)),
            package(PackageCategory::AddOn, now - Duration::hours(2)),
        ];

        let evaluated = ExpiryEvaluator::evaluate(&packages, now);
        assert_eq!(evaluated[0].state, ExpiryState::Expired);
        assert_eq!(evaluated[1].state, ExpiryState::Active);
        assert!(evaluated[1].inactive);
        assert!(!evaluated[1].is_effectively_active());
    }

    #[test]
    fn test_add_on_stays_active_when_a_newer_main_package_is_running() {
        let now = Utc::now();
        let packages = vec![
            package(PackageCategory::Day, now - Duration::hours(30)),
            package(PackageCategory::Day, now - Duration::hours(1)),
            package(PackageCategory::AddOn, now - Duration::hours(2)),
        ];

        let evaluated = ExpiryEvaluator::evaluate(&packages, now);
        assert!(evaluated[2].is_effectively_active());
    }

    #[test]
    fn test_add_ons_without_any_main_package_stay_active() {
        let now = Utc::now();
        let packages = vec![package(PackageCategory::AddOn, now)];
        assert!(ExpiryEvaluator::evaluate(&packages, now)[0].is_effectively_active());
    }

    #[test]
    fn test_stored_status_is_ignored() {
        let now = Utc::now();
        let mut day = package(PackageCategory::Day, now);
        day.status = PackageStatus::Expired;
        assert!(ExpiryEvaluator::evaluate(&[day], now)[0].is_effectively_active());
    }
}
