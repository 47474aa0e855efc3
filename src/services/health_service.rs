use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report the process health while logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_record_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "record store health check failed");
            }
        }
        Err(_) => warn!("record store unavailable (degraded mode)"),
    }

    let open_rooms = state.open_room_ids().len();
    let oracle_configured = state.oracle().is_configured();
    if state.is_degraded().await {
        HealthResponse::degraded(open_rooms, oracle_configured)
    } else {
        HealthResponse::ok(open_rooms, oracle_configured)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::record_store::memory::InMemoryRecordStore,
        identity::IdentityStore, oracle::OracleAdapter, state::AppState,
    };

    #[tokio::test]
    async fn degraded_until_a_store_is_installed() {
        let state = AppState::new(
            AppConfig::default(),
            IdentityStore::ephemeral(),
            OracleAdapter::disabled(),
        );
        let health = health_status(&state).await;
        assert_eq!(health.status, "degraded");
        assert!(!health.oracle_configured);

        state
            .set_record_store(Arc::new(InMemoryRecordStore::new()))
            .await;
        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.open_rooms, 0);
    }
}
