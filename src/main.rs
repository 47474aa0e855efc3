//! Planning Poker Back binary entrypoint wiring REST, SSE, the record store and the oracle.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use futures::{FutureExt, future::BoxFuture};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planning_poker_back::{
    config::AppConfig,
    dao::{
        record_store::{RecordStore, memory::InMemoryRecordStore},
        storage::StorageResult,
    },
    identity::IdentityStore,
    oracle::{EstimateOracle, OracleAdapter, anthropic::AnthropicOracle},
    routes,
    services::{room_service, storage_supervisor},
    state::{AppState, SharedState},
};

type Connect = Box<dyn FnMut() -> BoxFuture<'static, StorageResult<Arc<dyn RecordStore>>> + Send>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let identity = IdentityStore::open(config.identity_path().clone());
    let oracle = OracleAdapter::new(
        AnthropicOracle::from_env().map(|oracle| Arc::new(oracle) as Arc<dyn EstimateOracle>),
    );
    let app_state = AppState::new(config, identity, oracle);

    tokio::spawn(storage_supervisor::run(app_state.clone(), store_connector()));
    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    leave_open_rooms(&app_state).await;
    Ok(())
}

/// Pick the record store backend from `STORE_BACKEND` (`couch` or `memory`).
fn store_connector() -> Connect {
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| default_backend().into());
    match backend.trim().to_ascii_lowercase().as_str() {
        #[cfg(feature = "couch-store")]
        "couch" | "couchdb" => Box::new(|| connect_couch().boxed()),
        "memory" => {
            info!("using the in-memory record store; rooms are not shared across processes");
            memory_connector()
        }
        other => {
            warn!(backend = other, "unknown STORE_BACKEND; falling back to the in-memory store");
            memory_connector()
        }
    }
}

fn memory_connector() -> Connect {
    let store = InMemoryRecordStore::new();
    Box::new(move || {
        let connected: StorageResult<Arc<dyn RecordStore>> = Ok(Arc::new(store.clone()));
        async move { connected }.boxed()
    })
}

fn default_backend() -> &'static str {
    if cfg!(feature = "couch-store") {
        "couch"
    } else {
        "memory"
    }
}

#[cfg(feature = "couch-store")]
async fn connect_couch() -> StorageResult<Arc<dyn RecordStore>> {
    use planning_poker_back::dao::record_store::couchdb::{CouchConfig, CouchRecordStore};

    let config = CouchConfig::from_env()?;
    let store = CouchRecordStore::connect(config).await?;
    Ok(Arc::new(store))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Best-effort removal of the local participant from every room still open.
async fn leave_open_rooms(state: &SharedState) {
    let open = state.open_room_ids().len();
    if open > 0 {
        info!(open, "leaving open rooms before exit");
        room_service::leave_all(state).await;
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
