use axum::Extension;
use axum::Json;
use chrono::Utc;

use crate::server::dtos::health_dto::HealthResponse;
use crate::server::services::RelayServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// liveness probe, no auth. The active session count doubles as a cheap
/// capacity readout for whoever operates the box.
pub async fn health_endpoint(
    Extension(services): Extension<RelayServices>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: format!("{:?}", services.config.cargo_env).to_lowercase(),
        active_sessions: services.sessions.active_sessions(),
    })
}
