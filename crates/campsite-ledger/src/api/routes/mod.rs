pub mod bookings;
pub mod events;
pub mod health;
pub mod meters;

use crate::api::error::{ApiError, Result};
use crate::domain::types::MeterId;

/// Meter ids arrive in request bodies; reject blanks before touching the ledger.
fn body_meter_id(raw: String) -> Result<MeterId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("meter_id must not be empty"));
    }
    Ok(MeterId::new(trimmed))
}
