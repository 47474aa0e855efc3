#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;

use futures::{future::BoxFuture, stream::BoxStream};

use crate::dao::models::{
    ChangeEvent, EstimateEntity, ParticipantEntity, RoomEntity, RoomPatch,
};
use crate::dao::storage::StorageResult;

/// Ordered stream of change notifications scoped to one room.
pub type ChangeFeed = BoxStream<'static, ChangeEvent>;

/// Abstraction over the durable multi-writer store shared by every client of a room.
///
/// Every write is echoed back through [`RecordStore::subscribe`] to all subscribers of the
/// room, including the writer.
pub trait RecordStore: Send + Sync {
    fn find_room(&self, id: &str) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Insert a room row, failing with [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict) when it exists.
    fn insert_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Merge `patch` into the stored room row and return the resulting row.
    fn update_room(
        &self,
        id: &str,
        patch: RoomPatch,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>>;
    fn list_participants(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>>;
    /// Insert a participant row, failing with a conflict when `(room_id, id)` exists.
    fn insert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Delete a participant and, with it, its estimate row. Returns whether a row was removed.
    fn delete_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn list_estimates(&self, room_id: &str)
    -> BoxFuture<'static, StorageResult<Vec<EstimateEntity>>>;
    /// Insert or replace the estimate keyed by `(room_id, participant_id)`.
    fn upsert_estimate(&self, estimate: EstimateEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Delete every estimate of a room, returning how many rows went away.
    fn delete_estimates(&self, room_id: &str) -> BoxFuture<'static, StorageResult<usize>>;
    /// Open the change feed of a room. Events written after this future resolves are delivered.
    fn subscribe(&self, room_id: &str) -> BoxFuture<'static, StorageResult<ChangeFeed>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
