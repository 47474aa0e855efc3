use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dto::{
        room::RoomSnapshot,
        sse::{ROOM_SNAPSHOT_EVENT, ServerEvent},
    },
    error::ServiceError,
    state::{SharedState, projection::RoomProjection},
};

/// What a room stream needs to render snapshots for one client.
pub struct RoomFeed {
    room_id: String,
    local_id: String,
    share_url: String,
    updates: watch::Receiver<RoomProjection>,
}

impl RoomFeed {
    fn snapshot_event(&self, projection: &RoomProjection) -> serde_json::Result<ServerEvent> {
        let snapshot = RoomSnapshot::new(projection, &self.local_id, self.share_url.clone());
        ServerEvent::json(ROOM_SNAPSHOT_EVENT.to_string(), &snapshot)
    }
}

/// Subscribe to the projection changes of an open room.
pub fn subscribe_room(state: &SharedState, room_id: &str) -> Result<RoomFeed, ServiceError> {
    let engine = state
        .room(room_id)
        .ok_or_else(|| ServiceError::NotFound(format!("room `{room_id}` is not open")))?;

    Ok(RoomFeed {
        room_id: room_id.to_string(),
        local_id: engine.local_participant().id.clone(),
        share_url: state.config().share_url(room_id),
        updates: engine.subscribe(),
    })
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Turn a room subscription into an SSE response: one snapshot on connect, then one after every
/// projection change. Intermediate states may be coalesced when the client is slow.
pub fn to_sse_stream(mut feed: RoomFeed) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        info!(room_id = %feed.room_id, "room SSE stream connected");
        loop {
            let projection = feed.updates.borrow_and_update().clone();
            let payload = feed.snapshot_event(&projection);
            match payload {
                Ok(payload) => {
                    if tx.send(Ok(to_event(payload))).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(room_id = %feed.room_id, error = %err, "failed to encode snapshot"),
            }

            tokio::select! {
                _ = tx.closed() => break,
                changed = feed.updates.changed() => {
                    // the engine is gone once the room is left
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(room_id = %feed.room_id, "room SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
