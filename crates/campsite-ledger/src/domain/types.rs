use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant that owns bookings, meters and settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrganizationId(Uuid);

impl OrganizationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OrganizationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrganizationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Booking number, the customer key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookingNumber(String);

impl BookingNumber {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device identifier of a pedestal meter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeterId(String);

impl MeterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId(Uuid);

impl PackageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PackageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PackageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Energy quantity in kWh with fixed decimal precision
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Kwh(Decimal);

impl Kwh {
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn from_decimal(amount: Decimal) -> Self {
        Self(amount.round_dp(6)) // Wh resolution with headroom
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Difference clamped at zero.
    pub fn saturating_sub(&self, other: Kwh) -> Self {
        if self.0 >= other.0 {
            Self::from_decimal(self.0 - other.0)
        } else {
            Self::zero()
        }
    }

    /// Counter delta since `reference`, `None` when the counter went backwards.
    pub fn delta_since(&self, reference: Kwh) -> Option<Self> {
        if self.0 >= reference.0 {
            Some(Self::from_decimal(self.0 - reference.0))
        } else {
            None
        }
    }

    /// `None` when the product leaves the `Decimal` range.
    pub fn checked_multiply(&self, factor: Decimal) -> Option<Decimal> {
        self.0.checked_mul(factor).map(|product| product.round_dp(6))
    }
}

/// Saturates at `Decimal::MAX`; stored quantities are bounded far below it.
impl Add for Kwh {
    type Output = Kwh;

    fn add(self, rhs: Kwh) -> Kwh {
        Kwh::from_decimal(self.0.saturating_add(rhs.0))
    }
}

impl Sum for Kwh {
    fn sum<I: Iterator<Item = Kwh>>(iter: I) -> Self {
        iter.fold(Kwh::zero(), Add::add)
    }
}

impl From<Decimal> for Kwh {
    fn from(amount: Decimal) -> Self {
        Self::from_decimal(amount)
    }
}

impl fmt::Display for Kwh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kWh", self.0.normalize())
    }
}

/// Package kind. Day and start packages are the duration-bound main allowance,
/// add-ons (tillæg) top it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageCategory {
    #[serde(rename = "startpakke")]
    Start,
    #[serde(rename = "dagspakke")]
    Day,
    #[serde(rename = "tillæg", alias = "tillaeg")]
    AddOn,
}

impl PackageCategory {
    /// Day/start packages come first in the waterfall.
    pub fn is_main(&self) -> bool {
        matches!(self, PackageCategory::Start | PackageCategory::Day)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageCategory::Start => "startpakke",
            PackageCategory::Day => "dagspakke",
            PackageCategory::AddOn => "tillæg",
        }
    }
}

impl fmt::Display for PackageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startpakke" => Ok(PackageCategory::Start),
            "dagspakke" => Ok(PackageCategory::Day),
            "tillæg" | "tillaeg" => Ok(PackageCategory::AddOn),
            other => Err(format!("unknown package category '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerKind {
    Transient,
    Seasonal,
}

impl CustomerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerKind::Transient => "transient",
            CustomerKind::Seasonal => "seasonal",
        }
    }
}

impl fmt::Display for CustomerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CustomerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(CustomerKind::Transient),
            "seasonal" => Ok(CustomerKind::Seasonal),
            other => Err(format!("unknown customer kind '{other}'")),
        }
    }
}

/// Stored audit marker. Never used to decide participation in allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Active,
    Expired,
    Exhausted,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Active => "active",
            PackageStatus::Expired => "expired",
            PackageStatus::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PackageStatus::Active),
            "expired" => Ok(PackageStatus::Expired),
            "exhausted" => Ok(PackageStatus::Exhausted),
            other => Err(format!("unknown package status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "ON",
            PowerState::Off => "OFF",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ON" => Ok(PowerState::On),
            "OFF" => Ok(PowerState::Off),
            other => Err(format!("unknown power state '{other}'")),
        }
    }
}

/// Why a meter was (or must be) forced off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    NoPackage,
    PackageExpired,
    UnitsExhausted,
    NoCustomer,
}

impl ShutdownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::NoPackage => "no_package",
            ShutdownReason::PackageExpired => "package_expired",
            ShutdownReason::UnitsExhausted => "units_exhausted",
            ShutdownReason::NoCustomer => "no_customer",
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShutdownReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_package" => Ok(ShutdownReason::NoPackage),
            "package_expired" => Ok(ShutdownReason::PackageExpired),
            "units_exhausted" => Ok(ShutdownReason::UnitsExhausted),
            "no_customer" => Ok(ShutdownReason::NoCustomer),
            other => Err(format!("unknown shutdown reason '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kwh_arithmetic_clamps_at_zero() {
        let five = Kwh::from_decimal(dec!(5));
        let seven = Kwh::from_decimal(dec!(7.25));

        assert_eq!(seven.saturating_sub(five), Kwh::from_decimal(dec!(2.25)));
        assert_eq!(five.saturating_sub(seven), Kwh::zero());
        assert_eq!(five + seven, Kwh::from_decimal(dec!(12.25)));
    }

    #[test]
    fn test_counter_delta_detects_regression() {
        let reference = Kwh::from_decimal(dec!(100));

        assert_eq!(
            Kwh::from_decimal(dec!(105.5)).delta_since(reference),
            Some(Kwh::from_decimal(dec!(5.5)))
        );
        assert_eq!(Kwh::from_decimal(dec!(99)).delta_since(reference), None);
    }

    #[test]
    fn test_fractional_kwh_survive_rounding() {
        let small = Kwh::from_decimal(dec!(0.0004567));
        assert_eq!(small.as_decimal(), dec!(0.000457));
    }

    #[test]
    fn test_category_round_trips_through_storage_names() {
        for category in [
            PackageCategory::Start,
            PackageCategory::Day,
            PackageCategory::AddOn,
        ] {
            assert_eq!(category.as_str().parse::<PackageCategory>(), Ok(category));
        }
        assert_eq!("tillaeg".parse(), Ok(PackageCategory::AddOn));
        assert!(PackageCategory::Day.is_main());
        assert!(!PackageCategory::AddOn.is_main());
    }

    #[test]
    fn test_power_state_parsing_is_case_insensitive() {
        assert_eq!("on".parse(), Ok(PowerState::On));
        assert_eq!("OFF".parse(), Ok(PowerState::Off));
        assert!("standby".parse::<PowerState>().is_err());
    }
}
