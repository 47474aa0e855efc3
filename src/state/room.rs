use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    dao::models::{EstimateEntity, ParticipantEntity, ParticipantKindEntity, RoomEntity},
    state::phase::RoomPhase,
};

/// Storage token used for the "unknown" card.
pub const UNKNOWN_TOKEN: &str = "?";
/// Prefix prepended to persona identifiers to build simulated participant ids.
pub const SIMULATED_ID_PREFIX: &str = "sim-";

/// Numeric members of the permitted estimation scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalePoint {
    One,
    Two,
    Three,
    Five,
    Eight,
    Thirteen,
    TwentyOne,
}

impl ScalePoint {
    /// Every numeric card, in scale order.
    pub const ALL: [ScalePoint; 7] = [
        ScalePoint::One,
        ScalePoint::Two,
        ScalePoint::Three,
        ScalePoint::Five,
        ScalePoint::Eight,
        ScalePoint::Thirteen,
        ScalePoint::TwentyOne,
    ];

    /// Numeric value printed on the card.
    pub const fn value(self) -> u8 {
        match self {
            ScalePoint::One => 1,
            ScalePoint::Two => 2,
            ScalePoint::Three => 3,
            ScalePoint::Five => 5,
            ScalePoint::Eight => 8,
            ScalePoint::Thirteen => 13,
            ScalePoint::TwentyOne => 21,
        }
    }

    /// Exact lookup of a card by its numeric value.
    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|point| point.value() == value)
    }

    /// Snap an arbitrary number onto the closest card.
    ///
    /// Ties resolve to the card that comes first in scale order, so `4` snaps to `3`.
    /// Returns `None` for NaN and infinities.
    pub fn nearest(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }

        Self::ALL.into_iter().min_by(|left, right| {
            let left = (f64::from(left.value()) - value).abs();
            let right = (f64::from(right.value()) - value).abs();
            left.total_cmp(&right)
        })
    }
}

impl fmt::Display for ScalePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Value of a single estimate: a card from the scale or the "unknown" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EstimateValue {
    /// A numeric card.
    Point(ScalePoint),
    /// The participant cannot estimate the topic. Only humans pick this one.
    Unknown,
}

/// Raised when a stored or submitted estimate is not on the permitted scale.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{0}` is not a card of the estimation scale")]
pub struct OffScaleValue(pub String);

impl FromStr for EstimateValue {
    type Err = OffScaleValue;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed == UNKNOWN_TOKEN {
            return Ok(EstimateValue::Unknown);
        }

        trimmed
            .parse::<u8>()
            .ok()
            .and_then(ScalePoint::from_value)
            .map(EstimateValue::Point)
            .ok_or_else(|| OffScaleValue(raw.to_string()))
    }
}

impl TryFrom<String> for EstimateValue {
    type Error = OffScaleValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EstimateValue> for String {
    fn from(value: EstimateValue) -> Self {
        value.to_string()
    }
}

impl fmt::Display for EstimateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimateValue::Point(point) => point.fmt(f),
            EstimateValue::Unknown => f.write_str(UNKNOWN_TOKEN),
        }
    }
}

/// Work item being estimated in the current round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topic {
    pub title: String,
    pub description: String,
}

impl Topic {
    /// Build a topic from its two text fields.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }

    /// True when neither the title nor the description carries any text.
    pub fn is_blank(&self) -> bool {
        self.title.trim().is_empty() && self.description.trim().is_empty()
    }
}

/// Character sheet of a simulated participant, loaded from the persona catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    /// Stable catalog identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text role description, also fed to the estimate oracle.
    pub role: String,
    /// Avatar reference used by the frontend.
    pub avatar_ref: String,
}

impl Persona {
    /// Participant id this persona takes when seated in a room.
    pub fn participant_id(&self) -> String {
        format!("{SIMULATED_ID_PREFIX}{}", self.id)
    }
}

/// Whether a participant is a person or a simulated voter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantKind {
    Human,
    Simulated(Persona),
}

/// Member of a room's roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub avatar_ref: String,
    pub kind: ParticipantKind,
}

impl Participant {
    /// Build the roster entry of a human participant.
    pub fn human(
        id: impl Into<String>,
        display_name: impl Into<String>,
        avatar_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: avatar_ref.into(),
            kind: ParticipantKind::Human,
        }
    }

    /// Build the roster entry of a simulated participant from its persona.
    pub fn simulated(persona: Persona) -> Self {
        Self {
            id: persona.participant_id(),
            display_name: persona.name.clone(),
            avatar_ref: persona.avatar_ref.clone(),
            kind: ParticipantKind::Simulated(persona),
        }
    }

    /// Persona driving this participant, if it is simulated.
    pub fn persona(&self) -> Option<&Persona> {
        match &self.kind {
            ParticipantKind::Simulated(persona) => Some(persona),
            ParticipantKind::Human => None,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.kind, ParticipantKind::Simulated(_))
    }
}

/// A participant's vote for the current round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Estimate {
    pub participant_id: String,
    pub value: EstimateValue,
    /// Explanation attached by simulated participants.
    pub rationale: Option<String>,
}

/// Raised when a stored row cannot be turned into a domain value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("simulated participant `{id}` has no persona descriptor")]
    MissingPersona { id: String },
}

impl From<&RoomEntity> for Topic {
    fn from(room: &RoomEntity) -> Self {
        Self {
            title: room.topic_title.clone(),
            description: room.topic_description.clone(),
        }
    }
}

impl TryFrom<ParticipantEntity> for Participant {
    type Error = RowError;

    fn try_from(value: ParticipantEntity) -> Result<Self, Self::Error> {
        let kind = match value.kind {
            ParticipantKindEntity::Human => ParticipantKind::Human,
            ParticipantKindEntity::Simulated => {
                let role = value
                    .persona
                    .ok_or_else(|| RowError::MissingPersona {
                        id: value.id.clone(),
                    })?;
                let persona_id = value
                    .id
                    .strip_prefix(SIMULATED_ID_PREFIX)
                    .unwrap_or(&value.id)
                    .to_string();
                ParticipantKind::Simulated(Persona {
                    id: persona_id,
                    name: value.name.clone(),
                    role,
                    avatar_ref: value.avatar_ref.clone(),
                })
            }
        };

        Ok(Self {
            id: value.id,
            display_name: value.name,
            avatar_ref: value.avatar_ref,
            kind,
        })
    }
}

impl From<(&str, &Participant)> for ParticipantEntity {
    fn from((room_id, participant): (&str, &Participant)) -> Self {
        let (kind, persona) = match &participant.kind {
            ParticipantKind::Human => (ParticipantKindEntity::Human, None),
            ParticipantKind::Simulated(persona) => {
                (ParticipantKindEntity::Simulated, Some(persona.role.clone()))
            }
        };

        Self {
            id: participant.id.clone(),
            room_id: room_id.to_string(),
            name: participant.display_name.clone(),
            kind,
            avatar_ref: participant.avatar_ref.clone(),
            persona,
        }
    }
}

impl From<EstimateEntity> for Estimate {
    fn from(value: EstimateEntity) -> Self {
        Self {
            participant_id: value.participant_id,
            value: value.value,
            rationale: value.rationale,
        }
    }
}

impl From<(&str, &Estimate)> for EstimateEntity {
    fn from((room_id, estimate): (&str, &Estimate)) -> Self {
        EstimateEntity::new(
            room_id,
            &estimate.participant_id,
            estimate.value,
            estimate.rationale.clone(),
        )
    }
}

/// Build the room row that mirrors a phase and topic.
pub fn room_entity(room_id: &str, phase: RoomPhase, topic: &Topic) -> RoomEntity {
    RoomEntity {
        id: room_id.to_string(),
        topic_title: topic.title.clone(),
        topic_description: topic.description.clone(),
        phase,
    }
}
