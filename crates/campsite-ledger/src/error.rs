use crate::domain::types::{BookingNumber, MeterId, ShutdownReason};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Meter {meter_id} is already assigned to booking {owner}")]
    Conflict { meter_id: MeterId, owner: BookingNumber },

    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Booking not found: {booking}")]
    BookingNotFound { booking: BookingNumber },

    #[error("Meter {meter_id} is not attached to booking {booking}")]
    ExtraMeterNotAttached {
        booking: BookingNumber,
        meter_id: MeterId,
    },

    #[error("Meter {meter_id} is not registered with this organization")]
    MeterNotFound { meter_id: MeterId },

    #[error("No reading available for meter {meter_id}")]
    MeterReadingUnavailable { meter_id: MeterId },

    #[error("Power on refused for meter {meter_id}: {reason}")]
    PowerRefused {
        meter_id: MeterId,
        reason: ShutdownReason,
    },

    #[error("Database error during {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Concurrent update rejected during {operation}, retry the request")]
    SerializationConflict { operation: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LedgerError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Only serialization failures are safe to replay as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::SerializationConflict { .. })
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Conflict { .. } => "LEDGER_METER_CONFLICT",
            LedgerError::Validation { .. } => "LEDGER_VALIDATION_ERROR",
            LedgerError::BookingNotFound { .. } => "LEDGER_BOOKING_NOT_FOUND",
            LedgerError::ExtraMeterNotAttached { .. } => "LEDGER_EXTRA_METER_NOT_ATTACHED",
            LedgerError::MeterNotFound { .. } => "LEDGER_METER_NOT_FOUND",
            LedgerError::MeterReadingUnavailable { .. } => "LEDGER_METER_READING_UNAVAILABLE",
            LedgerError::PowerRefused { .. } => "LEDGER_POWER_REFUSED",
            LedgerError::Database { .. } => "LEDGER_DATABASE_ERROR",
            LedgerError::SerializationConflict { .. } => "LEDGER_SERIALIZATION_CONFLICT",
            LedgerError::Configuration(_) => "LEDGER_CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
