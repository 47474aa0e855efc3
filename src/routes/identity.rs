use axum::{Json, Router, extract::State, routing::get};
use axum_valid::Valid;

use crate::{
    dto::identity::{IdentityResponse, UpdateIdentityRequest},
    services::room_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/identity",
    tag = "identity",
    responses((status = 200, description = "Local identity", body = IdentityResponse))
)]
/// Return the display name chosen on this machine, if any.
pub async fn get_identity(State(state): State<SharedState>) -> Json<IdentityResponse> {
    Json(room_service::get_identity(&state))
}

#[utoipa::path(
    put,
    path = "/identity",
    tag = "identity",
    request_body = UpdateIdentityRequest,
    responses(
        (status = 200, description = "Display name stored", body = IdentityResponse),
        (status = 400, description = "Display name must have 2 to 20 characters")
    )
)]
/// Choose the display name used when joining rooms.
pub async fn update_identity(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<UpdateIdentityRequest>>,
) -> Json<IdentityResponse> {
    Json(room_service::update_identity(&state, payload))
}

/// Configure the identity routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/identity", get(get_identity).put(update_identity))
}
