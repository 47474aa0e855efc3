use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Stage of the current estimation round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomPhase {
    /// The topic is being prepared; nobody votes yet.
    #[default]
    Setup,
    /// Votes are being collected and stay hidden.
    Voting,
    /// Votes are visible to everyone.
    Revealed,
}

/// Error returned when a caller requests a phase edge the room flow does not use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: cannot move from {from:?} to {to:?}")]
pub struct InvalidTransition {
    /// Phase the room was in when the transition was requested.
    pub from: RoomPhase,
    /// Requested phase.
    pub to: RoomPhase,
}

impl RoomPhase {
    /// Validate a transition against the edges used by the room flow.
    ///
    /// The reconciliation engine writes whatever it is asked to; this check is applied by the
    /// request-facing layer before it asks.
    pub fn transition_to(self, next: RoomPhase) -> Result<RoomPhase, InvalidTransition> {
        match (self, next) {
            (RoomPhase::Setup, RoomPhase::Voting)
            | (RoomPhase::Voting, RoomPhase::Revealed)
            | (RoomPhase::Revealed, RoomPhase::Voting) => Ok(next),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }

    /// Whether the topic may be edited from this phase.
    pub fn allows_topic_edit(self) -> bool {
        matches!(self, RoomPhase::Setup)
    }
}
