use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post, put},
};
use axum_valid::Valid;

use crate::{
    dto::room::{
        ActionResponse, CastVoteRequest, NextRoundRequest, OpenRoomQuery, RoomSnapshot,
        SetPhaseRequest, ShareResponse, UpdateTopicRequest,
    },
    error::AppError,
    services::room_service,
    state::SharedState,
};

/// Room lifecycle, topic, phase and voting endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms/open", post(open_room))
        .route("/rooms/{id}", get(get_room))
        .route("/rooms/{id}/share", get(share_room))
        .route("/rooms/{id}/topic", put(update_topic))
        .route("/rooms/{id}/phase", put(set_phase))
        .route("/rooms/{id}/rounds", post(next_round))
        .route("/rooms/{id}/votes", post(cast_vote))
        .route("/rooms/{id}/simulated", post(add_simulated))
        .route("/rooms/{id}/leave", post(leave_room))
}

/// Open an existing room or create a new one, seating the local participant.
///
/// Answers `503` while no record store is reachable; the frontend keeps its loading state.
#[utoipa::path(
    post,
    path = "/rooms/open",
    tag = "rooms",
    params(OpenRoomQuery),
    responses(
        (status = 200, description = "Room opened", body = RoomSnapshot),
        (status = 400, description = "Malformed room id"),
        (status = 409, description = "No display name chosen yet"),
        (status = 503, description = "Record store unavailable")
    )
)]
pub async fn open_room(
    State(state): State<SharedState>,
    Query(query): Query<OpenRoomQuery>,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(room_service::open_room(&state, query.room).await?))
}

#[utoipa::path(
    get,
    path = "/rooms/{id}",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Current room snapshot", body = RoomSnapshot),
        (status = 404, description = "Room not open")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(room_service::room_snapshot(&state, &id)?))
}

/// Link other people can follow to join the room.
#[utoipa::path(
    get,
    path = "/rooms/{id}/share",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Share URL", body = ShareResponse),
        (status = 404, description = "Room not open")
    )
)]
pub async fn share_room(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ShareResponse>, AppError> {
    Ok(Json(room_service::share_link(&state, &id)?))
}

#[utoipa::path(
    put,
    path = "/rooms/{id}/topic",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    request_body = UpdateTopicRequest,
    responses(
        (status = 200, description = "Topic updated", body = RoomSnapshot),
        (status = 404, description = "Room not open"),
        (status = 409, description = "Room is not in setup")
    )
)]
pub async fn update_topic(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<UpdateTopicRequest>>,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(room_service::update_topic(&state, &id, payload).await?))
}

/// Start voting, reveal the votes, or re-vote after a reveal.
#[utoipa::path(
    put,
    path = "/rooms/{id}/phase",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    request_body = SetPhaseRequest,
    responses(
        (status = 200, description = "Phase changed", body = RoomSnapshot),
        (status = 404, description = "Room not open"),
        (status = 409, description = "Transition not allowed")
    )
)]
pub async fn set_phase(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<SetPhaseRequest>,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(
        room_service::change_phase(&state, &id, payload.phase).await?,
    ))
}

/// Begin the next round after a reveal, optionally on a fresh topic.
#[utoipa::path(
    post,
    path = "/rooms/{id}/rounds",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    request_body = NextRoundRequest,
    responses(
        (status = 200, description = "Voting restarted", body = RoomSnapshot),
        (status = 404, description = "Room not open"),
        (status = 409, description = "Votes are not revealed")
    )
)]
pub async fn next_round(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<NextRoundRequest>,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(
        room_service::start_next_round(&state, &id, payload.clear_topic).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/rooms/{id}/votes",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    request_body = CastVoteRequest,
    responses(
        (status = 200, description = "Vote recorded", body = RoomSnapshot),
        (status = 400, description = "Value outside the scale"),
        (status = 404, description = "Room not open"),
        (status = 409, description = "Room is not voting")
    )
)]
pub async fn cast_vote(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<CastVoteRequest>>,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(room_service::cast_vote(&state, &id, payload).await?))
}

/// Seat up to three simulated participants not yet in the room.
#[utoipa::path(
    post,
    path = "/rooms/{id}/simulated",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Simulated participants seated", body = RoomSnapshot),
        (status = 404, description = "Room not open")
    )
)]
pub async fn add_simulated(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<RoomSnapshot>, AppError> {
    Ok(Json(room_service::add_simulated(&state, &id).await?))
}

#[utoipa::path(
    post,
    path = "/rooms/{id}/leave",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room left", body = ActionResponse),
        (status = 404, description = "Room not open")
    )
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    room_service::leave_room(&state, &id).await?;
    Ok(Json(ActionResponse {
        message: format!("left room `{id}`"),
    }))
}
