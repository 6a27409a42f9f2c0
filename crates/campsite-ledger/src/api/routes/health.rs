use crate::api::types::HealthResponse;
use axum::Json;
use chrono::Utc;

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        timestamp: Utc::now(),
    })
}
