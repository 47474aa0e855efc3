use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Planning Poker Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::identity::get_identity,
        crate::routes::identity::update_identity,
        crate::routes::rooms::open_room,
        crate::routes::rooms::get_room,
        crate::routes::rooms::share_room,
        crate::routes::rooms::update_topic,
        crate::routes::rooms::set_phase,
        crate::routes::rooms::next_round,
        crate::routes::rooms::cast_vote,
        crate::routes::rooms::add_simulated,
        crate::routes::rooms::leave_room,
        crate::routes::sse::room_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::identity::IdentityResponse,
            crate::dto::identity::UpdateIdentityRequest,
            crate::dto::room::RoomSnapshot,
            crate::dto::room::TopicView,
            crate::dto::room::ParticipantView,
            crate::dto::room::ParticipantKindView,
            crate::dto::room::ShareResponse,
            crate::dto::room::UpdateTopicRequest,
            crate::dto::room::SetPhaseRequest,
            crate::dto::room::NextRoundRequest,
            crate::dto::room::CastVoteRequest,
            crate::dto::room::ActionResponse,
            crate::state::phase::RoomPhase,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "identity", description = "Display name of the local participant"),
        (name = "rooms", description = "Room lifecycle, topic, phases and votes"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
