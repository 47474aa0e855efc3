pub mod phase;
pub mod projection;
pub mod room;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;

use crate::{
    config::AppConfig,
    dao::record_store::RecordStore,
    error::ServiceError,
    identity::IdentityStore,
    oracle::OracleAdapter,
    services::room_engine::RoomEngine,
};

pub type SharedState = Arc<AppState>;

/// A room opened by this process: its engine and, when enabled, its simulated-voter task.
pub struct RoomSession {
    engine: RoomEngine,
    voters: Option<JoinHandle<()>>,
}

impl RoomSession {
    pub fn new(engine: RoomEngine, voters: Option<JoinHandle<()>>) -> Self {
        Self { engine, voters }
    }

    pub fn engine(&self) -> &RoomEngine {
        &self.engine
    }

    /// Stop the scheduler and the change feed.
    pub fn shutdown(self) {
        if let Some(voters) = self.voters {
            voters.abort();
        }
        self.engine.close();
    }
}

/// Central application state: configuration, local identity, the record store slot and the
/// registry of open rooms.
pub struct AppState {
    config: AppConfig,
    identity: IdentityStore,
    oracle: Arc<OracleAdapter>,
    record_store: RwLock<Option<Arc<dyn RecordStore>>>,
    degraded: watch::Sender<bool>,
    rooms: DashMap<String, RoomSession>,
    open_gate: Mutex<()>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`].
    ///
    /// The application starts in degraded mode until a record store is installed.
    pub fn new(config: AppConfig, identity: IdentityStore, oracle: OracleAdapter) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            identity,
            oracle: Arc::new(oracle),
            record_store: RwLock::new(None),
            degraded: degraded_tx,
            rooms: DashMap::new(),
            open_gate: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    pub fn oracle(&self) -> Arc<OracleAdapter> {
        self.oracle.clone()
    }

    /// Obtain a handle to the current record store, if one is installed.
    pub async fn record_store(&self) -> Option<Arc<dyn RecordStore>> {
        self.record_store.read().await.as_ref().cloned()
    }

    /// Return the record store or fail with [`ServiceError::Degraded`] while none is installed.
    pub async fn require_record_store(&self) -> Result<Arc<dyn RecordStore>, ServiceError> {
        self.record_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a record store implementation and leave degraded mode.
    pub async fn set_record_store(&self, store: Arc<dyn RecordStore>) {
        {
            let mut guard = self.record_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Serializes room bootstrap so one room is never opened twice concurrently.
    pub fn open_gate(&self) -> &Mutex<()> {
        &self.open_gate
    }

    /// Engine of an open room.
    pub fn room(&self, room_id: &str) -> Option<RoomEngine> {
        self.rooms
            .get(room_id)
            .map(|session| session.engine().clone())
    }

    pub fn register_room(&self, room_id: &str, session: RoomSession) {
        if let Some(previous) = self.rooms.insert(room_id.to_string(), session) {
            previous.shutdown();
        }
    }

    /// Forget an open room and stop its background tasks.
    pub fn close_room(&self, room_id: &str) -> Option<RoomEngine> {
        let (_, session) = self.rooms.remove(room_id)?;
        let engine = session.engine().clone();
        session.shutdown();
        Some(engine)
    }

    pub fn open_room_ids(&self) -> Vec<String> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }
}
