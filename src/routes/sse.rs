use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/rooms/{id}",
    tag = "sse",
    params(("id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "`room.snapshot` events, one per room change", content_type = "text/event-stream", body = String),
        (status = 404, description = "Room not open")
    )
)]
/// Stream the snapshot of an open room after every change.
pub async fn room_stream(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let feed = sse_service::subscribe_room(&state, &id)?;
    info!(room_id = %id, "new room SSE connection");
    Ok(sse_service::to_sse_stream(feed))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/rooms/{id}", get(room_stream))
}
