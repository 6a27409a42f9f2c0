use crate::domain::types::{
    BookingNumber, CustomerKind, Kwh, MeterId, OrganizationId, PowerState, ShutdownReason,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Where and from which counter value a booking's primary meter usage is measured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterAssignment {
    pub meter_id: MeterId,
    pub start_energy: Kwh,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub organization_id: OrganizationId,
    pub booking_number: BookingNumber,
    pub customer_kind: CustomerKind,
    pub meter: Option<MeterAssignment>,
}

impl Booking {
    pub fn new(
        organization_id: OrganizationId,
        booking_number: BookingNumber,
        customer_kind: CustomerKind,
    ) -> Self {
        Self {
            organization_id,
            booking_number,
            customer_kind,
            meter: None,
        }
    }

    pub fn meter_id(&self) -> Option<&MeterId> {
        self.meter.as_ref().map(|m| &m.meter_id)
    }

    pub fn meter_start_energy(&self) -> Option<Kwh> {
        self.meter.as_ref().map(|m| m.start_energy)
    }
}

/// One telemetry sample from the device layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub meter_id: MeterId,
    pub time: DateTime<Utc>,
    pub energy: Kwh,
    pub power: f64,
    pub voltage: f64,
    pub current: f64,
    pub state: PowerState,
    pub online: bool,
}

impl MeterReading {
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.time > max_age
    }
}

/// Registry entry for a meter as known to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterRecord {
    pub organization_id: OrganizationId,
    pub meter_id: MeterId,
    pub owner: Option<BookingNumber>,
    /// Optimistic state: last commanded or reported
    pub power_state: PowerState,
    pub last_shutdown_reason: Option<ShutdownReason>,
    pub updated_at: DateTime<Utc>,
}

impl MeterRecord {
    pub fn new(organization_id: OrganizationId, meter_id: MeterId) -> Self {
        Self {
            organization_id,
            meter_id,
            owner: None,
            power_state: PowerState::Off,
            last_shutdown_reason: None,
            updated_at: Utc::now(),
        }
    }
}

/// Secondary meter whose usage is pooled into the booking's packages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraMeter {
    pub organization_id: OrganizationId,
    pub booking_number: BookingNumber,
    pub meter_id: MeterId,
    pub start_energy: Kwh,
    pub attached_at: DateTime<Utc>,
}

/// Who holds a meter right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeterOwnership {
    Primary(BookingNumber),
    Extra(BookingNumber),
}

impl MeterOwnership {
    pub fn booking(&self) -> &BookingNumber {
        match self {
            MeterOwnership::Primary(booking) | MeterOwnership::Extra(booking) => booking,
        }
    }
}
