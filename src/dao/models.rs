use serde::{Deserialize, Serialize};

use crate::state::{
    phase::RoomPhase,
    room::{EstimateValue, Topic},
};

/// Row of the `rooms` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Short opaque room identifier, shared through the invite URL.
    pub id: String,
    #[serde(default)]
    pub topic_title: String,
    #[serde(default)]
    pub topic_description: String,
    pub phase: RoomPhase,
}

impl RoomEntity {
    /// Fresh room row: setup phase, empty topic.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic_title: String::new(),
            topic_description: String::new(),
            phase: RoomPhase::Setup,
        }
    }
}

/// Partial update of a room row. Only the populated fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub topic_title: Option<String>,
    pub topic_description: Option<String>,
    pub phase: Option<RoomPhase>,
}

impl RoomPatch {
    /// Patch touching the topic fields only.
    pub fn topic(topic: &Topic) -> Self {
        Self {
            topic_title: Some(topic.title.clone()),
            topic_description: Some(topic.description.clone()),
            phase: None,
        }
    }

    /// Patch touching the phase only.
    pub fn phase(phase: RoomPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    /// Merge the populated fields into `room`.
    pub fn apply_to(&self, room: &mut RoomEntity) {
        if let Some(title) = &self.topic_title {
            room.topic_title.clone_from(title);
        }
        if let Some(description) = &self.topic_description {
            room.topic_description.clone_from(description);
        }
        if let Some(phase) = self.phase {
            room.phase = phase;
        }
    }
}

/// Storage form of a participant kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantKindEntity {
    Human,
    Simulated,
}

/// Row of the `participants` table, keyed by `(room_id, id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    pub id: String,
    pub room_id: String,
    pub name: String,
    pub kind: ParticipantKindEntity,
    #[serde(default)]
    pub avatar_ref: String,
    /// Persona descriptor, present for simulated participants only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

/// Row of the `estimates` table, keyed by `room_id:participant_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EstimateEntity {
    pub id: String,
    pub room_id: String,
    pub participant_id: String,
    pub value: EstimateValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl EstimateEntity {
    /// Build an estimate row with its composite identifier.
    pub fn new(
        room_id: &str,
        participant_id: &str,
        value: EstimateValue,
        rationale: Option<String>,
    ) -> Self {
        Self {
            id: estimate_row_id(room_id, participant_id),
            room_id: room_id.to_string(),
            participant_id: participant_id.to_string(),
            value,
            rationale,
        }
    }
}

/// Composite identifier of an estimate row.
pub fn estimate_row_id(room_id: &str, participant_id: &str) -> String {
    format!("{room_id}:{participant_id}")
}

/// Kind of change reported by the store's change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row carried by a change event, tagged by table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRow {
    Room(RoomEntity),
    Participant(ParticipantEntity),
    Estimate(EstimateEntity),
}

impl ChangeRow {
    /// Room the row belongs to.
    pub fn room_id(&self) -> &str {
        match self {
            ChangeRow::Room(room) => &room.id,
            ChangeRow::Participant(participant) => &participant.room_id,
            ChangeRow::Estimate(estimate) => &estimate.room_id,
        }
    }
}

impl From<RoomEntity> for ChangeRow {
    fn from(value: RoomEntity) -> Self {
        ChangeRow::Room(value)
    }
}

impl From<ParticipantEntity> for ChangeRow {
    fn from(value: ParticipantEntity) -> Self {
        ChangeRow::Participant(value)
    }
}

impl From<EstimateEntity> for ChangeRow {
    fn from(value: EstimateEntity) -> Self {
        ChangeRow::Estimate(value)
    }
}

/// One notification of the change feed: `{eventType, row}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub row: ChangeRow,
}

impl ChangeEvent {
    pub fn insert(row: impl Into<ChangeRow>) -> Self {
        Self {
            kind: ChangeKind::Insert,
            row: row.into(),
        }
    }

    pub fn update(row: impl Into<ChangeRow>) -> Self {
        Self {
            kind: ChangeKind::Update,
            row: row.into(),
        }
    }

    pub fn delete(row: impl Into<ChangeRow>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            row: row.into(),
        }
    }

    /// Room the event is scoped to.
    pub fn room_id(&self) -> &str {
        self.row.room_id()
    }
}
