//! Request and response bodies of the ledger API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterRequest {
    pub meter_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerRequest {
    /// `ON` or `OFF`, case-insensitive
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownEventRequest {
    pub meter_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}
