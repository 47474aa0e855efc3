//! Request-facing room operations. Phase and topic rules of the room flow are enforced here;
//! the engine below writes whatever it is asked to.

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        identity::{IdentityResponse, UpdateIdentityRequest},
        room::{CastVoteRequest, RoomSnapshot, ShareResponse, UpdateTopicRequest},
        validation::validate_room_id,
    },
    error::ServiceError,
    services::{room_engine::RoomEngine, simulated_voters},
    state::{
        RoomSession, SharedState,
        phase::RoomPhase,
        room::{EstimateValue, Participant},
    },
};

const ROOM_ID_LENGTH: usize = 8;

/// Open (or create) a room and seat the local human in it.
///
/// Without `room` a fresh id is generated. Opening a room this process already follows returns
/// its current snapshot.
pub async fn open_room(
    state: &SharedState,
    room: Option<String>,
) -> Result<RoomSnapshot, ServiceError> {
    let room_id = match room.map(|id| id.trim().to_string()) {
        Some(id) if !id.is_empty() => checked_room_id(id)?,
        _ => generate_room_id(),
    };

    if let Some(engine) = state.room(&room_id) {
        return Ok(snapshot_of(state, &engine));
    }

    let _gate = state.open_gate().lock().await;
    if let Some(engine) = state.room(&room_id) {
        return Ok(snapshot_of(state, &engine));
    }

    let Some(display_name) = state.identity().resolve_display_name() else {
        return Err(ServiceError::InvalidState(
            "choose a display name before joining a room".into(),
        ));
    };
    let store = state.require_record_store().await?;

    let participant_id = state.identity().resolve_participant_id(&room_id);
    let avatar_ref = state.config().avatar_url(&display_name);
    let local = Participant::human(participant_id, display_name, avatar_ref);

    let engine = RoomEngine::open(store, &room_id, local, state.config().personas().to_vec())
        .await
        .inspect_err(|err| warn!(%room_id, error = %err, "failed to open room"))?;

    let voters = state.config().drive_simulated().then(|| {
        simulated_voters::spawn(engine.clone(), state.oracle(), state.config().vote_delay())
    });
    state.register_room(&room_id, RoomSession::new(engine.clone(), voters));

    Ok(snapshot_of(state, &engine))
}

/// Current snapshot of an open room.
pub fn room_snapshot(state: &SharedState, room_id: &str) -> Result<RoomSnapshot, ServiceError> {
    let engine = require_room(state, room_id)?;
    Ok(snapshot_of(state, &engine))
}

/// Shareable link of an open room.
pub fn share_link(state: &SharedState, room_id: &str) -> Result<ShareResponse, ServiceError> {
    let engine = require_room(state, room_id)?;
    Ok(ShareResponse {
        room_id: engine.room_id().to_string(),
        share_url: state.config().share_url(engine.room_id()),
    })
}

/// Replace the topic while the room is being set up.
pub async fn update_topic(
    state: &SharedState,
    room_id: &str,
    request: UpdateTopicRequest,
) -> Result<RoomSnapshot, ServiceError> {
    let engine = require_room(state, room_id)?;
    let phase = engine.snapshot().phase;
    if !phase.allows_topic_edit() {
        return Err(ServiceError::InvalidState(format!(
            "the topic can only be edited during setup (room is {phase:?})"
        )));
    }

    engine
        .set_topic(request.title.trim(), request.description.trim())
        .await;
    Ok(snapshot_of(state, &engine))
}

/// Move the room along one of the edges of the room flow.
pub async fn change_phase(
    state: &SharedState,
    room_id: &str,
    next: RoomPhase,
) -> Result<RoomSnapshot, ServiceError> {
    let engine = require_room(state, room_id)?;
    let current = engine.snapshot().phase;
    current.transition_to(next)?;

    info!(room_id, from = ?current, to = ?next, "changing phase");
    engine.set_phase(next).await;
    Ok(snapshot_of(state, &engine))
}

/// Start another round after a reveal, optionally clearing the topic first.
pub async fn start_next_round(
    state: &SharedState,
    room_id: &str,
    clear_topic: bool,
) -> Result<RoomSnapshot, ServiceError> {
    let engine = require_room(state, room_id)?;
    let current = engine.snapshot().phase;
    if current != RoomPhase::Revealed {
        return Err(ServiceError::InvalidState(format!(
            "a new round can only start once votes are revealed (room is {current:?})"
        )));
    }

    if clear_topic {
        engine.set_topic("", "").await;
    }
    engine.set_phase(RoomPhase::Voting).await;
    info!(room_id, clear_topic, round = engine.snapshot().round, "next round started");
    Ok(snapshot_of(state, &engine))
}

/// Cast or replace the vote of the local human.
pub async fn cast_vote(
    state: &SharedState,
    room_id: &str,
    request: CastVoteRequest,
) -> Result<RoomSnapshot, ServiceError> {
    let value = request
        .value
        .parse::<EstimateValue>()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    let engine = require_room(state, room_id)?;
    let phase = engine.snapshot().phase;
    if phase != RoomPhase::Voting {
        return Err(ServiceError::InvalidState(format!(
            "votes are only accepted while voting (room is {phase:?})"
        )));
    }

    let participant_id = engine.local_participant().id.clone();
    engine.cast_vote(&participant_id, value, None).await;
    Ok(snapshot_of(state, &engine))
}

/// Seat another batch of simulated participants.
pub async fn add_simulated(
    state: &SharedState,
    room_id: &str,
) -> Result<RoomSnapshot, ServiceError> {
    let engine = require_room(state, room_id)?;
    let added = engine.add_simulated_participants().await;
    info!(room_id, added = added.len(), "simulated participants requested");
    Ok(snapshot_of(state, &engine))
}

/// Leave a room and stop following it.
pub async fn leave_room(state: &SharedState, room_id: &str) -> Result<(), ServiceError> {
    let engine = require_room(state, room_id)?;
    engine.leave().await;
    state.close_room(room_id);
    info!(room_id, "left room");
    Ok(())
}

/// Leave every open room. Used on shutdown.
pub async fn leave_all(state: &SharedState) {
    for room_id in state.open_room_ids() {
        if let Err(err) = leave_room(state, &room_id).await {
            warn!(%room_id, error = %err, "failed to leave room on shutdown");
        }
    }
}

pub fn get_identity(state: &SharedState) -> IdentityResponse {
    let display_name = state.identity().resolve_display_name();
    IdentityResponse {
        avatar_ref: display_name
            .as_deref()
            .map(|name| state.config().avatar_url(name)),
        display_name,
    }
}

/// Store the display name used for rooms opened from now on.
pub fn update_identity(state: &SharedState, request: UpdateIdentityRequest) -> IdentityResponse {
    state.identity().commit_display_name(&request.display_name);
    info!(display_name = %request.display_name.trim(), "display name updated");
    get_identity(state)
}

fn require_room(state: &SharedState, room_id: &str) -> Result<RoomEngine, ServiceError> {
    state
        .room(room_id)
        .ok_or_else(|| ServiceError::NotFound(format!("room `{room_id}` is not open")))
}

fn snapshot_of(state: &SharedState, engine: &RoomEngine) -> RoomSnapshot {
    RoomSnapshot::new(
        &engine.snapshot(),
        &engine.local_participant().id,
        state.config().share_url(engine.room_id()),
    )
}

fn checked_room_id(id: String) -> Result<String, ServiceError> {
    validate_room_id(&id).map_err(|err| {
        ServiceError::InvalidInput(
            err.message
                .map(|message| message.to_string())
                .unwrap_or_else(|| "invalid room id".into()),
        )
    })?;
    Ok(id)
}

fn generate_room_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(ROOM_ID_LENGTH);
    id
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::record_store::{RecordStore, memory::InMemoryRecordStore},
        identity::IdentityStore,
        oracle::OracleAdapter,
        state::AppState,
    };

    fn bare_state() -> SharedState {
        AppState::new(
            AppConfig::default().with_drive_simulated(false),
            IdentityStore::ephemeral(),
            OracleAdapter::disabled(),
        )
    }

    async fn ready_state() -> (SharedState, InMemoryRecordStore) {
        let state = bare_state();
        let store = InMemoryRecordStore::new();
        state.set_record_store(Arc::new(store.clone())).await;
        state.identity().commit_display_name("Ada");
        (state, store)
    }

    fn vote(value: &str) -> CastVoteRequest {
        CastVoteRequest {
            value: value.into(),
        }
    }

    #[tokio::test]
    async fn opening_without_a_display_name_is_refused() {
        let state = bare_state();
        state
            .set_record_store(Arc::new(InMemoryRecordStore::new()))
            .await;
        let err = open_room(&state, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn opening_while_degraded_reports_loading() {
        let state = bare_state();
        state.identity().commit_display_name("Ada");
        let err = open_room(&state, Some("r1".into())).await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }

    #[tokio::test]
    async fn opening_without_an_id_creates_a_shareable_room() {
        let (state, store) = ready_state().await;
        let snapshot = open_room(&state, None).await.unwrap();

        assert_eq!(snapshot.room_id.len(), ROOM_ID_LENGTH);
        assert!(snapshot.share_url.ends_with(&format!("?room={}", snapshot.room_id)));
        assert_eq!(snapshot.phase, RoomPhase::Setup);
        assert_eq!(snapshot.participants.len(), 1);
        assert!(snapshot.participants[0].is_local);
        assert_eq!(snapshot.participants[0].display_name, "Ada");
        assert!(store.find_room(&snapshot.room_id).await.unwrap().is_some());

        let share = share_link(&state, &snapshot.room_id).unwrap();
        assert_eq!(share.share_url, snapshot.share_url);
    }

    #[tokio::test]
    async fn reopening_reuses_the_open_room() {
        let (state, _store) = ready_state().await;
        let first = open_room(&state, Some("team-42".into())).await.unwrap();
        let second = open_room(&state, Some(" team-42 ".into())).await.unwrap();
        assert_eq!(first.participants[0].id, second.participants[0].id);
        assert_eq!(state.open_room_ids(), vec!["team-42".to_string()]);
    }

    #[tokio::test]
    async fn malformed_room_ids_are_rejected() {
        let (state, _store) = ready_state().await;
        let err = open_room(&state, Some("a b".into())).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_rooms_are_not_found() {
        let (state, _store) = ready_state().await;
        assert!(matches!(
            room_snapshot(&state, "nope"),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            cast_vote(&state, "nope", vote("3")).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn topic_is_only_editable_during_setup() {
        let (state, _store) = ready_state().await;
        open_room(&state, Some("r1".into())).await.unwrap();

        let request = || UpdateTopicRequest {
            title: " Login page ".into(),
            description: "OAuth only".into(),
        };
        let snapshot = update_topic(&state, "r1", request()).await.unwrap();
        assert_eq!(snapshot.topic.title, "Login page");

        change_phase(&state, "r1", RoomPhase::Voting).await.unwrap();
        let err = update_topic(&state, "r1", request()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn phases_follow_the_room_flow() {
        let (state, _store) = ready_state().await;
        open_room(&state, Some("r1".into())).await.unwrap();

        let err = change_phase(&state, "r1", RoomPhase::Revealed)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let err = cast_vote(&state, "r1", vote("5")).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        change_phase(&state, "r1", RoomPhase::Voting).await.unwrap();
        let snapshot = cast_vote(&state, "r1", vote("5")).await.unwrap();
        assert!(snapshot.participants[0].has_voted);
        assert!(snapshot.participants[0].vote.is_none());
        assert!(snapshot.all_voted);

        let snapshot = change_phase(&state, "r1", RoomPhase::Revealed).await.unwrap();
        assert_eq!(snapshot.participants[0].vote.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn off_scale_votes_are_bad_input() {
        let (state, _store) = ready_state().await;
        open_room(&state, Some("r1".into())).await.unwrap();
        change_phase(&state, "r1", RoomPhase::Voting).await.unwrap();
        let err = cast_vote(&state, "r1", vote("4")).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn next_round_revotes_or_moves_on() {
        let (state, store) = ready_state().await;
        open_room(&state, Some("r1".into())).await.unwrap();
        update_topic(
            &state,
            "r1",
            UpdateTopicRequest {
                title: "Search".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            start_next_round(&state, "r1", false).await,
            Err(ServiceError::InvalidState(_))
        ));

        change_phase(&state, "r1", RoomPhase::Voting).await.unwrap();
        cast_vote(&state, "r1", vote("?")).await.unwrap();
        change_phase(&state, "r1", RoomPhase::Revealed).await.unwrap();

        let revote = start_next_round(&state, "r1", false).await.unwrap();
        assert_eq!(revote.phase, RoomPhase::Voting);
        assert_eq!(revote.topic.title, "Search");
        assert!(!revote.participants[0].has_voted);
        assert!(store.list_estimates("r1").await.unwrap().is_empty());

        change_phase(&state, "r1", RoomPhase::Revealed).await.unwrap();
        let next = start_next_round(&state, "r1", true).await.unwrap();
        assert_eq!(next.phase, RoomPhase::Voting);
        assert!(next.topic.title.is_empty());
        assert!(next.round > revote.round);
    }

    #[tokio::test]
    async fn simulated_participants_join_in_batches() {
        let (state, _store) = ready_state().await;
        open_room(&state, Some("r1".into())).await.unwrap();
        let snapshot = add_simulated(&state, "r1").await.unwrap();
        assert_eq!(snapshot.participants.len(), 4);
        assert!(
            snapshot.participants[1..]
                .iter()
                .all(|p| p.persona.is_some() && !p.is_local)
        );
    }

    #[tokio::test]
    async fn leaving_removes_the_seat_and_forgets_the_room() {
        let (state, store) = ready_state().await;
        open_room(&state, Some("r1".into())).await.unwrap();
        leave_room(&state, "r1").await.unwrap();

        assert!(state.open_room_ids().is_empty());
        assert!(store.list_participants("r1").await.unwrap().is_empty());
        assert!(matches!(
            leave_room(&state, "r1").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn identity_round_trip() {
        let state = bare_state();
        assert!(get_identity(&state).display_name.is_none());

        let identity = update_identity(
            &state,
            UpdateIdentityRequest {
                display_name: "  Grace ".into(),
            },
        );
        assert_eq!(identity.display_name.as_deref(), Some("Grace"));
        assert!(identity.avatar_ref.unwrap().contains("Grace"));
    }
}
