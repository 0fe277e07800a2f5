use chrono::{DateTime, Utc};
use serde::Serialize;

/// nothing to probe beyond the process itself - all state is in-memory,
/// so the liveness answer is flat
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub version: String,
    pub environment: String,
    pub active_sessions: usize,
}
