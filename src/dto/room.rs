//! DTO definitions of the room REST API and of the room SSE stream.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dto::validation::validate_estimate_value,
    state::{
        phase::RoomPhase,
        projection::RoomProjection,
        room::{Participant, ParticipantKind},
    },
};

/// Query of `POST /rooms/open`. Without a room id a new room is created.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OpenRoomQuery {
    /// Room to join, as found in a share URL.
    pub room: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TopicView {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantKindView {
    Human,
    Simulated,
}

/// Roster entry as rendered by the frontend.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantView {
    pub id: String,
    pub display_name: String,
    pub avatar_ref: String,
    pub kind: ParticipantKindView,
    /// Role of a simulated participant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    /// Whether this entry is the human behind this client.
    pub is_local: bool,
    pub has_voted: bool,
    /// Card played this round, hidden until the votes are revealed.
    pub vote: Option<String>,
    /// Explanation attached to a simulated vote, hidden until the votes are revealed.
    pub rationale: Option<String>,
}

/// Full state of a room pushed to the frontend.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub share_url: String,
    pub phase: RoomPhase,
    pub topic: TopicView,
    pub participants: Vec<ParticipantView>,
    pub all_voted: bool,
    /// Voting rounds observed by this client.
    pub round: u64,
}

impl RoomSnapshot {
    /// Render a projection for the participant `local_id`.
    pub fn new(projection: &RoomProjection, local_id: &str, share_url: String) -> Self {
        let revealed = projection.phase == RoomPhase::Revealed;
        let participants = projection
            .participants
            .values()
            .map(|participant| {
                let estimate = projection.estimates.get(&participant.id);
                let visible = estimate.filter(|_| revealed);
                ParticipantView {
                    is_local: participant.id == local_id,
                    has_voted: estimate.is_some(),
                    vote: visible.map(|estimate| estimate.value.to_string()),
                    rationale: visible.and_then(|estimate| estimate.rationale.clone()),
                    ..ParticipantView::from(participant)
                }
            })
            .collect();

        Self {
            room_id: projection.room_id.clone(),
            share_url,
            phase: projection.phase,
            topic: TopicView {
                title: projection.topic.title.clone(),
                description: projection.topic.description.clone(),
            },
            participants,
            all_voted: projection.all_voted(),
            round: projection.round,
        }
    }
}

impl From<&Participant> for ParticipantView {
    fn from(participant: &Participant) -> Self {
        let (kind, persona) = match &participant.kind {
            ParticipantKind::Human => (ParticipantKindView::Human, None),
            ParticipantKind::Simulated(persona) => {
                (ParticipantKindView::Simulated, Some(persona.role.clone()))
            }
        };
        Self {
            id: participant.id.clone(),
            display_name: participant.display_name.clone(),
            avatar_ref: participant.avatar_ref.clone(),
            kind,
            persona,
            is_local: false,
            has_voted: false,
            vote: None,
            rationale: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ShareResponse {
    pub room_id: String,
    pub share_url: String,
}

/// Request to replace the topic while the room is being set up.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateTopicRequest {
    #[validate(length(max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub description: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetPhaseRequest {
    pub phase: RoomPhase,
}

/// Start another round after a reveal.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct NextRoundRequest {
    /// Clear the topic first ("next topic") instead of re-voting the same one.
    #[serde(default)]
    pub clear_topic: bool,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CastVoteRequest {
    /// One of `1`, `2`, `3`, `5`, `8`, `13`, `21` or `?`.
    #[validate(custom(function = "validate_estimate_value"))]
    pub value: String,
}

/// Generic action acknowledgement.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{ChangeEvent, EstimateEntity, ParticipantEntity, RoomEntity};
    use crate::state::room::{EstimateValue, Persona, ScalePoint};

    fn projection(phase: RoomPhase) -> RoomProjection {
        let mut projection = RoomProjection::empty("r1");
        let persona = Persona {
            id: "qa".into(),
            name: "Tomasz".into(),
            role: "QA".into(),
            avatar_ref: String::new(),
        };
        for participant in [Participant::human("a", "Ada", ""), Participant::simulated(persona)] {
            projection.apply(&ChangeEvent::insert(ParticipantEntity::from((
                "r1",
                &participant,
            ))));
        }
        projection.apply(&ChangeEvent::update(RoomEntity {
            phase,
            ..RoomEntity::new("r1")
        }));
        projection.apply(&ChangeEvent::insert(EstimateEntity::new(
            "r1",
            "sim-qa",
            EstimateValue::Point(ScalePoint::Thirteen),
            Some("Lots of edge cases.".into()),
        )));
        projection
    }

    #[test]
    fn votes_stay_hidden_until_reveal() {
        let snapshot = RoomSnapshot::new(&projection(RoomPhase::Voting), "a", "url".into());
        let simulated = &snapshot.participants[1];
        assert!(simulated.has_voted);
        assert!(simulated.vote.is_none());
        assert!(simulated.rationale.is_none());
        assert!(snapshot.participants[0].is_local);
        assert!(!snapshot.participants[0].has_voted);
        assert!(!snapshot.all_voted);
    }

    #[test]
    fn revealed_rooms_show_votes_and_rationales() {
        let snapshot = RoomSnapshot::new(&projection(RoomPhase::Revealed), "a", "url".into());
        let simulated = &snapshot.participants[1];
        assert_eq!(simulated.vote.as_deref(), Some("13"));
        assert_eq!(simulated.rationale.as_deref(), Some("Lots of edge cases."));
        assert_eq!(simulated.persona.as_deref(), Some("QA"));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["phase"], "REVEALED");
        assert_eq!(json["participants"][1]["kind"], "SIMULATED");
    }

    #[test]
    fn next_round_defaults_to_revote() {
        let request: NextRoundRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.clear_topic);
    }
}
