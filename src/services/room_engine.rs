//! Per-room reconciliation engine.
//!
//! Each open room owns one [`RoomProjection`] held in a `watch` channel. Remote change events
//! and local optimistic writes both go through [`RoomProjection::apply`], so the echo of a
//! local write is a no-op and every subscriber only wakes on real changes.
//!
//! Room rows from the feed always overwrite the local phase and topic, even when they echo an
//! older local write. When a feed ends, for instance after it fell behind, the engine
//! subscribes again and replaces its rows with a fresh fetch.

use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use futures::StreamExt;
use rand::seq::IndexedRandom;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{ChangeEvent, EstimateEntity, ParticipantEntity, RoomEntity, RoomPatch},
        record_store::{ChangeFeed, RecordStore},
        storage::{StorageError, StorageResult},
    },
    state::{
        phase::RoomPhase,
        projection::RoomProjection,
        room::{Estimate, EstimateValue, Participant, Persona, Topic, room_entity},
    },
};

/// Number of simulated participants seated by one "add simulated participants" request.
pub const SIMULATED_BATCH: usize = 3;

const RESUBSCRIBE_BACKOFF_START: Duration = Duration::from_secs(1);
const RESUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Error raised when a room cannot be bootstrapped.
#[derive(Debug, thiserror::Error)]
#[error("room `{room_id}` could not be created or fetched")]
pub struct RoomVanished {
    room_id: String,
}

/// Handle on the live state of one room. Cheap to clone.
#[derive(Clone)]
pub struct RoomEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    room_id: String,
    local: Participant,
    store: Arc<dyn RecordStore>,
    personas: Vec<Persona>,
    projection: watch::Sender<RoomProjection>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl EngineInner {
    fn apply(&self, event: &ChangeEvent) -> bool {
        self.projection.send_if_modified(|projection| projection.apply(event))
    }

    /// Apply a local room patch on top of the projected room row.
    fn apply_patch(&self, patch: &RoomPatch) -> bool {
        self.projection.send_if_modified(|projection| {
            let mut room = room_entity(&self.room_id, projection.phase, &projection.topic);
            patch.apply_to(&mut room);
            projection.apply(&ChangeEvent::update(room))
        })
    }

    /// Subscribe again and replace the projected rows with a fresh fetch.
    ///
    /// The new feed is opened before the fetch so writes landing in between are not lost.
    async fn resync(&self) -> StorageResult<ChangeFeed> {
        let feed = self.store.subscribe(&self.room_id).await?;
        let room = self.store.find_room(&self.room_id).await?;
        let participants = self.store.list_participants(&self.room_id).await?;
        let estimates = self.store.list_estimates(&self.room_id).await?;

        let changed = self.projection.send_if_modified(|projection| {
            let room = room.unwrap_or_else(|| {
                room_entity(&self.room_id, projection.phase, &projection.topic)
            });
            projection.resync(&room, participants, estimates)
        });
        info!(room_id = %self.room_id, changed, "room resynchronised from the store");
        Ok(feed)
    }

    fn apply_all(&self, events: &[ChangeEvent]) -> bool {
        self.projection.send_if_modified(|projection| {
            events
                .iter()
                .fold(false, |changed, event| projection.apply(event) | changed)
        })
    }

    fn stop_feed(&self) {
        let handle = self
            .feed_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.stop_feed();
    }
}

impl RoomEngine {
    /// Bootstrap a room and start following its change feed.
    ///
    /// The feed is opened before the initial fetch; events buffered meanwhile are applied on
    /// top of the fetched rows, so nothing written between the two is lost. The room is created
    /// when missing and `local` is seated when absent from the roster.
    pub async fn open(
        store: Arc<dyn RecordStore>,
        room_id: &str,
        local: Participant,
        personas: Vec<Persona>,
    ) -> StorageResult<Self> {
        let feed = store.subscribe(room_id).await?;

        let room = fetch_or_create_room(store.as_ref(), room_id).await?;
        let participants = store.list_participants(room_id).await?;
        let estimates = store.list_estimates(room_id).await?;
        let mut projection = RoomProjection::seed(&room, participants, estimates);

        if !projection.participants.contains_key(&local.id) {
            let row = ParticipantEntity::from((room_id, &local));
            match store.insert_participant(row.clone()).await {
                Ok(()) => {}
                Err(err) if err.is_conflict() => {
                    debug!(room_id, participant_id = %local.id, "participant already seated");
                }
                Err(err) => return Err(err),
            }
            projection.apply(&ChangeEvent::insert(row));
        }

        info!(
            room_id,
            participant_id = %local.id,
            phase = ?projection.phase,
            roster = projection.participants.len(),
            "room opened"
        );

        let (projection, _) = watch::channel(projection);
        let inner = Arc::new(EngineInner {
            room_id: room_id.to_string(),
            local,
            store,
            personas,
            projection,
            feed_task: Mutex::new(None),
        });

        let handle = tokio::spawn(follow_feed(Arc::downgrade(&inner), feed));
        *inner
            .feed_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        Ok(Self { inner })
    }

    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    /// The human participant this engine acts for.
    pub fn local_participant(&self) -> &Participant {
        &self.inner.local
    }

    /// Copy of the current projection.
    pub fn snapshot(&self) -> RoomProjection {
        self.inner.projection.borrow().clone()
    }

    /// Receiver notified after every projection change.
    pub fn subscribe(&self) -> watch::Receiver<RoomProjection> {
        self.inner.projection.subscribe()
    }

    pub fn all_voted(&self) -> bool {
        self.inner.projection.borrow().all_voted()
    }

    /// Replace the topic. Only the topic fields are written.
    pub async fn set_topic(&self, title: &str, description: &str) {
        let patch = RoomPatch::topic(&Topic::new(title, description));
        self.write_room(patch, "set topic").await;
    }

    /// Move the room to `next`.
    ///
    /// Entering voting also wipes every estimate of the room, locally and in the store. The
    /// engine accepts any edge; callers decide which ones are legal.
    pub async fn set_phase(&self, next: RoomPhase) {
        if next == RoomPhase::Voting {
            let events: Vec<ChangeEvent> = self
                .inner
                .projection
                .borrow()
                .estimates
                .values()
                .map(|estimate| {
                    ChangeEvent::delete(EstimateEntity::from((self.room_id(), estimate)))
                })
                .collect();
            self.inner.apply_all(&events);

            let cleared = self.inner.store.delete_estimates(self.room_id()).await;
            if let Ok(count) = &cleared {
                debug!(room_id = %self.room_id(), count, "cleared estimates for new round");
            }
            self.absorb(cleared.map(drop), "clear estimates");
        }

        self.write_room(RoomPatch::phase(next), "set phase").await;
    }

    /// Upsert the estimate of `participant_id` for the current round.
    pub async fn cast_vote(
        &self,
        participant_id: &str,
        value: EstimateValue,
        rationale: Option<String>,
    ) {
        let estimate = Estimate {
            participant_id: participant_id.to_string(),
            value,
            rationale,
        };
        let row = EstimateEntity::from((self.room_id(), &estimate));
        self.inner.apply(&ChangeEvent::insert(row.clone()));

        let result = self.inner.store.upsert_estimate(row).await;
        self.absorb(result, "cast vote");
    }

    /// Seat up to [`SIMULATED_BATCH`] personas that are not in the room yet, chosen at random.
    ///
    /// Returns the participants that were added to the projection.
    pub async fn add_simulated_participants(&self) -> Vec<Participant> {
        let chosen: Vec<Participant> = {
            let projection = self.inner.projection.borrow();
            let available: Vec<&Persona> = self
                .inner
                .personas
                .iter()
                .filter(|persona| {
                    !projection
                        .participants
                        .contains_key(&persona.participant_id())
                })
                .collect();
            available
                .choose_multiple(&mut rand::rng(), SIMULATED_BATCH)
                .map(|persona| Participant::simulated((*persona).clone()))
                .collect()
        };

        if chosen.is_empty() {
            info!(room_id = %self.room_id(), "every persona is already seated");
            return chosen;
        }

        let rows: Vec<ParticipantEntity> = chosen
            .iter()
            .map(|participant| ParticipantEntity::from((self.room_id(), participant)))
            .collect();
        let events: Vec<ChangeEvent> = rows.iter().cloned().map(ChangeEvent::insert).collect();
        self.inner.apply_all(&events);

        for row in rows {
            let participant_id = row.id.clone();
            match self.inner.store.insert_participant(row).await {
                Err(err) if err.is_conflict() => {
                    debug!(room_id = %self.room_id(), %participant_id, "persona seated concurrently");
                }
                result => self.absorb(result, "add simulated participant"),
            }
        }
        chosen
    }

    /// Remove the local human from the roster. Best effort.
    pub async fn leave(&self) {
        let row = ParticipantEntity::from((self.room_id(), &self.inner.local));
        self.inner.apply(&ChangeEvent::delete(row));

        let result = self
            .inner
            .store
            .delete_participant(self.room_id(), &self.inner.local.id)
            .await;
        self.absorb(result.map(drop), "leave room");
    }

    /// Stop following the change feed. The projection stays readable.
    pub fn close(&self) {
        self.inner.stop_feed();
        debug!(room_id = %self.room_id(), "room engine closed");
    }

    async fn write_room(&self, patch: RoomPatch, operation: &'static str) {
        self.inner.apply_patch(&patch);
        let result = self
            .inner
            .store
            .update_room(self.room_id(), patch)
            .await;
        self.absorb(result.map(drop), operation);
    }

    /// Log and swallow a failed durable write; the optimistic update stays in place.
    fn absorb(&self, result: StorageResult<()>, operation: &'static str) {
        if let Err(err) = result {
            warn!(room_id = %self.room_id(), operation, error = %err, "store write failed");
        }
    }
}

async fn fetch_or_create_room(store: &dyn RecordStore, room_id: &str) -> StorageResult<RoomEntity> {
    if let Some(room) = store.find_room(room_id).await? {
        return Ok(room);
    }

    let room = RoomEntity::new(room_id);
    match store.insert_room(room.clone()).await {
        Ok(()) => {
            info!(room_id, "created room");
            Ok(room)
        }
        Err(err) if err.is_conflict() => {
            debug!(room_id, "room created concurrently, fetching it");
            store.find_room(room_id).await?.ok_or_else(|| {
                StorageError::unavailable(
                    format!("room `{room_id}` vanished after creation race"),
                    RoomVanished {
                        room_id: room_id.to_string(),
                    },
                )
            })
        }
        Err(err) => Err(err),
    }
}

/// Apply change events in delivery order until the engine is dropped.
///
/// A feed that ends is replaced by a new subscription plus a full fetch, retried with backoff.
async fn follow_feed(engine: Weak<EngineInner>, mut feed: ChangeFeed) {
    loop {
        while let Some(event) = feed.next().await {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if engine.apply(&event) {
                debug!(room_id = %engine.room_id, kind = ?event.kind, "applied remote change");
            }
        }

        let mut delay = RESUBSCRIBE_BACKOFF_START;
        feed = loop {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            warn!(room_id = %engine.room_id, "change feed ended, resubscribing");
            match engine.resync().await {
                Ok(feed) => break feed,
                Err(err) => {
                    warn!(room_id = %engine.room_id, error = %err, retry_in = ?delay, "resubscribe failed");
                }
            }
            drop(engine);
            sleep(delay).await;
            delay = (delay * 2).min(RESUBSCRIBE_BACKOFF_MAX);
        };
    }
}
