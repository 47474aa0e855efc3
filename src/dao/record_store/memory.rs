//! Process-local record store. Rows live in memory and every write is fanned out to the
//! room's subscribers through a Tokio broadcast channel.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use futures::{StreamExt, future::BoxFuture};
use indexmap::IndexMap;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::warn;

use super::{ChangeFeed, RecordStore};
use crate::dao::{
    models::{ChangeEvent, EstimateEntity, ParticipantEntity, RoomEntity, RoomPatch},
    storage::{StorageError, StorageResult},
};

const FEED_CAPACITY: usize = 256;

/// In-memory [`RecordStore`] shared by every engine of the process.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    tables: RwLock<Tables>,
    feeds: DashMap<String, broadcast::Sender<ChangeEvent>>,
}

#[derive(Default)]
struct Tables {
    rooms: HashMap<String, RoomEntity>,
    participants: HashMap<String, IndexMap<String, ParticipantEntity>>,
    estimates: HashMap<String, IndexMap<String, EstimateEntity>>,
}

/// Failure reported when updating a room that was never created.
#[derive(Debug, thiserror::Error)]
#[error("room `{0}` does not exist")]
pub struct MissingRoom(String);

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fan an event out to the room's subscribers.
    ///
    /// Called while the table lock is held so subscribers observe writes in commit order.
    fn publish(&self, event: ChangeEvent) {
        if let Some(sender) = self.inner.feeds.get(event.room_id()) {
            let _ = sender.send(event);
        }
    }

    async fn insert_room(&self, room: RoomEntity) -> StorageResult<()> {
        let mut tables = self.inner.tables.write().await;
        if tables.rooms.contains_key(&room.id) {
            return Err(StorageError::conflict(format!("room `{}`", room.id)));
        }
        tables.rooms.insert(room.id.clone(), room.clone());
        self.publish(ChangeEvent::insert(room));
        Ok(())
    }

    async fn update_room(&self, id: String, patch: RoomPatch) -> StorageResult<RoomEntity> {
        let mut tables = self.inner.tables.write().await;
        let Some(room) = tables.rooms.get_mut(&id) else {
            return Err(StorageError::unavailable(
                format!("cannot update room `{id}`"),
                MissingRoom(id),
            ));
        };
        patch.apply_to(room);
        let updated = room.clone();
        self.publish(ChangeEvent::update(updated.clone()));
        Ok(updated)
    }

    async fn insert_participant(&self, participant: ParticipantEntity) -> StorageResult<()> {
        let mut tables = self.inner.tables.write().await;
        let roster = tables
            .participants
            .entry(participant.room_id.clone())
            .or_default();
        if roster.contains_key(&participant.id) {
            return Err(StorageError::conflict(format!(
                "participant `{}` in room `{}`",
                participant.id, participant.room_id
            )));
        }
        roster.insert(participant.id.clone(), participant.clone());
        self.publish(ChangeEvent::insert(participant));
        Ok(())
    }

    async fn delete_participant(
        &self,
        room_id: String,
        participant_id: String,
    ) -> StorageResult<bool> {
        let mut tables = self.inner.tables.write().await;
        let removed = tables
            .participants
            .get_mut(&room_id)
            .and_then(|roster| roster.shift_remove(&participant_id));
        let Some(participant) = removed else {
            return Ok(false);
        };

        let estimate = tables
            .estimates
            .get_mut(&room_id)
            .and_then(|estimates| estimates.shift_remove(&participant_id));

        self.publish(ChangeEvent::delete(participant));
        if let Some(estimate) = estimate {
            self.publish(ChangeEvent::delete(estimate));
        }
        Ok(true)
    }

    async fn upsert_estimate(&self, estimate: EstimateEntity) -> StorageResult<()> {
        let mut tables = self.inner.tables.write().await;
        let previous = tables
            .estimates
            .entry(estimate.room_id.clone())
            .or_default()
            .insert(estimate.participant_id.clone(), estimate.clone());
        let event = if previous.is_some() {
            ChangeEvent::update(estimate)
        } else {
            ChangeEvent::insert(estimate)
        };
        self.publish(event);
        Ok(())
    }

    async fn delete_estimates(&self, room_id: String) -> StorageResult<usize> {
        let mut tables = self.inner.tables.write().await;
        let removed = tables.estimates.remove(&room_id).unwrap_or_default();
        let count = removed.len();
        for (_, estimate) in removed {
            self.publish(ChangeEvent::delete(estimate));
        }
        Ok(count)
    }

    fn subscribe(&self, room_id: &str) -> ChangeFeed {
        let receiver = self
            .inner
            .feeds
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe();

        let room_id = room_id.to_string();
        // A lagged subscriber has lost events; ending the feed makes the engine resync.
        BroadcastStream::new(receiver)
            .take_while(move |item| {
                if let Err(BroadcastStreamRecvError::Lagged(skipped)) = item {
                    warn!(room_id = %room_id, skipped, "change feed subscriber lagged");
                }
                futures::future::ready(item.is_ok())
            })
            .filter_map(|item| futures::future::ready(item.ok()))
            .boxed()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn find_room(&self, id: &str) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        let id = id.to_string();
        Box::pin(async move { Ok(store.inner.tables.read().await.rooms.get(&id).cloned()) })
    }

    fn insert_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_room(room).await })
    }

    fn update_room(
        &self,
        id: &str,
        patch: RoomPatch,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        let id = id.to_string();
        Box::pin(async move { store.update_room(id, patch).await })
    }

    fn list_participants(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            let tables = store.inner.tables.read().await;
            Ok(tables
                .participants
                .get(&room_id)
                .map(|roster| roster.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn insert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_participant(participant).await })
    }

    fn delete_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let room_id = room_id.to_string();
        let participant_id = participant_id.to_string();
        Box::pin(async move { store.delete_participant(room_id, participant_id).await })
    }

    fn list_estimates(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<EstimateEntity>>> {
        let store = self.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            let tables = store.inner.tables.read().await;
            Ok(tables
                .estimates
                .get(&room_id)
                .map(|estimates| estimates.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn upsert_estimate(&self, estimate: EstimateEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_estimate(estimate).await })
    }

    fn delete_estimates(&self, room_id: &str) -> BoxFuture<'static, StorageResult<usize>> {
        let store = self.clone();
        let room_id = room_id.to_string();
        Box::pin(async move { store.delete_estimates(room_id).await })
    }

    fn subscribe(&self, room_id: &str) -> BoxFuture<'static, StorageResult<ChangeFeed>> {
        let feed = InMemoryRecordStore::subscribe(self, room_id);
        Box::pin(async move { Ok(feed) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{ChangeKind, ChangeRow, ParticipantKindEntity};
    use crate::state::{
        phase::RoomPhase,
        room::{EstimateValue, ScalePoint},
    };

    fn human(room_id: &str, id: &str) -> ParticipantEntity {
        ParticipantEntity {
            id: id.into(),
            room_id: room_id.into(),
            name: id.to_uppercase(),
            kind: ParticipantKindEntity::Human,
            avatar_ref: String::new(),
            persona: None,
        }
    }

    fn vote(room_id: &str, id: &str, value: ScalePoint) -> EstimateEntity {
        EstimateEntity::new(room_id, id, EstimateValue::Point(value), None)
    }

    #[tokio::test]
    async fn inserting_an_existing_room_conflicts() {
        let store = InMemoryRecordStore::new();
        RecordStore::insert_room(&store, RoomEntity::new("r1")).await.unwrap();
        let err = RecordStore::insert_room(&store, RoomEntity::new("r1"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn feed_echoes_writes_in_commit_order() {
        let store = InMemoryRecordStore::new();
        let mut feed = RecordStore::subscribe(&store, "r1").await.unwrap();

        RecordStore::insert_room(&store, RoomEntity::new("r1")).await.unwrap();
        RecordStore::update_room(&store, "r1", RoomPatch::phase(RoomPhase::Voting))
            .await
            .unwrap();
        RecordStore::upsert_estimate(&store, vote("r1", "a", ScalePoint::Five))
            .await
            .unwrap();
        RecordStore::upsert_estimate(&store, vote("r1", "a", ScalePoint::Eight))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        for _ in 0..4 {
            kinds.push(feed.next().await.unwrap().kind);
        }
        assert_eq!(
            kinds,
            vec![
                ChangeKind::Insert,
                ChangeKind::Update,
                ChangeKind::Insert,
                ChangeKind::Update
            ]
        );
    }

    #[tokio::test]
    async fn feeds_are_scoped_to_their_room() {
        let store = InMemoryRecordStore::new();
        let mut feed = RecordStore::subscribe(&store, "r1").await.unwrap();

        RecordStore::insert_room(&store, RoomEntity::new("other")).await.unwrap();
        RecordStore::insert_room(&store, RoomEntity::new("r1")).await.unwrap();

        let event = feed.next().await.unwrap();
        assert_eq!(event.room_id(), "r1");
    }

    #[tokio::test]
    async fn deleting_a_participant_cascades_to_its_estimate() {
        let store = InMemoryRecordStore::new();
        RecordStore::insert_participant(&store, human("r1", "a")).await.unwrap();
        RecordStore::insert_participant(&store, human("r1", "b")).await.unwrap();
        RecordStore::upsert_estimate(&store, vote("r1", "a", ScalePoint::One))
            .await
            .unwrap();
        RecordStore::upsert_estimate(&store, vote("r1", "b", ScalePoint::Two))
            .await
            .unwrap();
        let mut feed = RecordStore::subscribe(&store, "r1").await.unwrap();

        assert!(
            RecordStore::delete_participant(&store, "r1", "a")
                .await
                .unwrap()
        );
        assert!(
            !RecordStore::delete_participant(&store, "r1", "a")
                .await
                .unwrap()
        );

        let estimates = RecordStore::list_estimates(&store, "r1").await.unwrap();
        assert_eq!(estimates.len(), 1);
        assert_eq!(estimates[0].participant_id, "b");

        let first = feed.next().await.unwrap();
        assert!(matches!(first.row, ChangeRow::Participant(_)));
        let second = feed.next().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Delete);
        assert!(matches!(second.row, ChangeRow::Estimate(_)));
    }

    #[tokio::test]
    async fn bulk_estimate_delete_reports_each_row() {
        let store = InMemoryRecordStore::new();
        RecordStore::upsert_estimate(&store, vote("r1", "a", ScalePoint::One))
            .await
            .unwrap();
        RecordStore::upsert_estimate(&store, vote("r1", "b", ScalePoint::Two))
            .await
            .unwrap();
        RecordStore::upsert_estimate(&store, vote("r2", "c", ScalePoint::Three))
            .await
            .unwrap();
        let mut feed = RecordStore::subscribe(&store, "r1").await.unwrap();

        let removed = RecordStore::delete_estimates(&store, "r1").await.unwrap();
        assert_eq!(removed, 2);
        for _ in 0..2 {
            assert_eq!(feed.next().await.unwrap().kind, ChangeKind::Delete);
        }
        assert_eq!(
            RecordStore::list_estimates(&store, "r2").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn lagged_feeds_end() {
        let store = InMemoryRecordStore::new();
        RecordStore::insert_room(&store, RoomEntity::new("r1")).await.unwrap();
        let mut feed = RecordStore::subscribe(&store, "r1").await.unwrap();

        for i in 0..=FEED_CAPACITY {
            RecordStore::upsert_estimate(&store, vote("r1", &format!("p{i}"), ScalePoint::One))
                .await
                .unwrap();
        }
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn updating_a_missing_room_fails() {
        let store = InMemoryRecordStore::new();
        let err = RecordStore::update_room(&store, "nope", RoomPatch::phase(RoomPhase::Voting))
            .await
            .unwrap_err();
        assert!(!err.is_conflict());
    }
}
