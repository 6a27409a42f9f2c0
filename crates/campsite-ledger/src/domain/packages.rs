use crate::domain::types::{
    BookingNumber, CustomerKind, Kwh, OrganizationId, PackageCategory, PackageId, PackageStatus,
};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A prepaid grant of kWh tied to a booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub organization_id: OrganizationId,
    pub booking_number: BookingNumber,
    pub category: PackageCategory,
    pub units: Kwh,
    pub payment_method: String,
    pub customer_kind: CustomerKind,
    /// Counter value this package measures from; `None` defers to the booking's
    /// meter assignment.
    pub start_energy: Option<Kwh>,
    /// Usage carried over from meters the booking has since vacated
    pub accumulated_usage: Kwh,
    /// Only day/start packages carry a duration.
    pub duration_hours: Option<u32>,
    pub status: PackageStatus,
    pub created_at: DateTime<Utc>,
}

impl Package {
    /// Saturates at the latest representable instant.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.duration_hours.map(|hours| {
            self.created_at
                .checked_add_signed(Duration::hours(i64::from(hours)))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    pub fn is_grant(&self) -> bool {
        is_grant_payment(&self.payment_method)
    }

    /// Reference counter value, if this package carries its own.
    pub fn own_start_energy(&self) -> Option<Kwh> {
        self.start_energy.filter(Kwh::is_positive)
    }
}

/// Bounds every package request must respect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageLimits {
    /// Largest free/grant package staff may issue
    pub grant_unit_cap: Kwh,
    pub max_units: Kwh,
    pub max_duration_hours: u32,
}

/// Input for a purchase or a staff grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequest {
    pub category: PackageCategory,
    pub units: Kwh,
    pub payment_method: String,
    #[serde(default)]
    pub duration_hours: Option<u32>,
}

impl PackageRequest {
    /// Rejects requests before anything is written.
    pub fn validate(&self, limits: &PackageLimits) -> Result<()> {
        if !self.units.is_positive() {
            return Err(LedgerError::validation(
                "units",
                format!("package units must be positive, got {}", self.units),
            ));
        }

        if self.units > limits.max_units {
            return Err(LedgerError::validation(
                "units",
                format!(
                    "packages are capped at {}, got {}",
                    limits.max_units, self.units
                ),
            ));
        }

        if is_grant_payment(&self.payment_method) && self.units > limits.grant_unit_cap {
            return Err(LedgerError::validation(
                "units",
                format!(
                    "granted packages are capped at {}, got {}",
                    limits.grant_unit_cap, self.units
                ),
            ));
        }

        match (self.category.is_main(), self.duration_hours) {
            (true, Some(0)) => Err(LedgerError::validation(
                "duration_hours",
                "day and start packages need a positive duration",
            )),
            (true, Some(hours)) if hours > limits.max_duration_hours => {
                Err(LedgerError::validation(
                    "duration_hours",
                    format!(
                        "duration is capped at {} hours, got {hours}",
                        limits.max_duration_hours
                    ),
                ))
            }
            (false, Some(_)) => Err(LedgerError::validation(
                "duration_hours",
                "add-on packages do not expire by duration",
            )),
            _ => Ok(()),
        }
    }

    pub fn into_package(
        self,
        organization_id: OrganizationId,
        booking_number: BookingNumber,
        customer_kind: CustomerKind,
        start_energy: Option<Kwh>,
        created_at: DateTime<Utc>,
    ) -> Package {
        Package {
            id: PackageId::new(),
            organization_id,
            booking_number,
            category: self.category,
            units: self.units,
            payment_method: self.payment_method,
            customer_kind,
            start_energy,
            accumulated_usage: Kwh::zero(),
            duration_hours: self.duration_hours,
            status: PackageStatus::Active,
            created_at,
        }
    }
}

pub fn is_grant_payment(payment_method: &str) -> bool {
    matches!(
        payment_method.to_ascii_lowercase().as_str(),
        "free" | "grant"
    )
}

/// Price of a package in the organization's currency. Grants are free.
pub fn quote_price(request: &PackageRequest, basis_price_per_unit: Decimal) -> Result<Decimal> {
    if is_grant_payment(&request.payment_method) {
        return Ok(Decimal::ZERO);
    }
    request
        .units
        .checked_multiply(basis_price_per_unit)
        .map(|price| price.round_dp(2))
        .ok_or_else(|| {
            LedgerError::validation(
                "units",
                format!(
                    "price of {} at {basis_price_per_unit} per unit is out of range",
                    request.units
                ),
            )
        })
}
