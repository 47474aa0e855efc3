use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Rooms this process currently follows.
    pub open_rooms: usize,
    /// Whether simulated participants are backed by a real oracle.
    pub oracle_configured: bool,
}

impl HealthResponse {
    pub fn ok(open_rooms: usize, oracle_configured: bool) -> Self {
        Self {
            status: "ok".to_string(),
            open_rooms,
            oracle_configured,
        }
    }

    /// No record store is installed or the installed one stopped answering.
    pub fn degraded(open_rooms: usize, oracle_configured: bool) -> Self {
        Self {
            status: "degraded".to_string(),
            open_rooms,
            oracle_configured,
        }
    }
}
