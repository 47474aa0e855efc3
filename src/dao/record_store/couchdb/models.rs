use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::models::{ChangeEvent, ChangeRow, EstimateEntity, ParticipantEntity, RoomEntity};

pub const ROOM_PREFIX: &str = "room::";
pub const PARTICIPANT_PREFIX: &str = "participant::";
pub const ESTIMATE_PREFIX: &str = "estimate::";
pub const END_SUFFIX: &str = "\u{ffff}";

pub fn room_doc_id(room_id: &str) -> String {
    format!("{ROOM_PREFIX}{room_id}")
}

pub fn participant_doc_id(room_id: &str, participant_id: &str) -> String {
    format!("{PARTICIPANT_PREFIX}{room_id}::{participant_id}")
}

pub fn estimate_doc_id(room_id: &str, participant_id: &str) -> String {
    format!("{ESTIMATE_PREFIX}{room_id}::{participant_id}")
}

/// Key prefix shared by every document of one kind inside a room.
pub fn room_scoped_prefix(kind_prefix: &str, room_id: &str) -> String {
    format!("{kind_prefix}{room_id}::")
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Stored document: CouchDB metadata plus one record tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Deleted documents keep their body so change listeners still see which row went away.
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(flatten)]
    pub body: DocumentBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentBody {
    Room(RoomEntity),
    Participant(ParticipantEntity),
    Estimate(EstimateEntity),
}

impl CouchDocument {
    pub fn room(room: RoomEntity, rev: Option<String>) -> Self {
        Self {
            id: room_doc_id(&room.id),
            rev,
            deleted: false,
            body: DocumentBody::Room(room),
        }
    }

    pub fn participant(participant: ParticipantEntity, rev: Option<String>) -> Self {
        Self {
            id: participant_doc_id(&participant.room_id, &participant.id),
            rev,
            deleted: false,
            body: DocumentBody::Participant(participant),
        }
    }

    pub fn estimate(estimate: EstimateEntity, rev: Option<String>) -> Self {
        Self {
            id: estimate_doc_id(&estimate.room_id, &estimate.participant_id),
            rev,
            deleted: false,
            body: DocumentBody::Estimate(estimate),
        }
    }

    /// Turn the document into a deletion marker that still carries its record.
    pub fn into_tombstone(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// Event emitted when this document shows up on the change feed.
    fn into_event(self) -> ChangeEvent {
        let created = self.rev.as_deref().is_some_and(|rev| rev.starts_with("1-"));
        let row: ChangeRow = match self.body {
            DocumentBody::Room(room) => room.into(),
            DocumentBody::Participant(participant) => participant.into(),
            DocumentBody::Estimate(estimate) => estimate.into(),
        };

        if self.deleted {
            ChangeEvent::delete(row)
        } else if created {
            ChangeEvent::insert(row)
        } else {
            ChangeEvent::update(row)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct BulkDocsRequest {
    pub docs: Vec<CouchDocument>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDocsResult {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub id: String,
}

/// One line of a continuous `_changes` response.
#[derive(Debug, Deserialize)]
pub struct ChangesLine {
    #[serde(default)]
    seq: Option<Value>,
    #[serde(default)]
    last_seq: Option<Value>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    doc: Option<Value>,
}

/// Interpretation of one line of the continuous feed.
#[derive(Debug)]
pub enum FeedLine {
    /// Blank line sent to keep the connection open.
    Heartbeat,
    /// A document changed. `event` is `None` when the document is not a record of ours.
    Change {
        seq: Option<String>,
        event: Option<ChangeEvent>,
    },
    /// The server closed the feed at this sequence.
    End { last_seq: Option<String> },
}

fn seq_token(value: Value) -> String {
    match value {
        Value::String(seq) => seq,
        other => other.to_string(),
    }
}

/// Decode one newline-delimited line of a `_changes?feed=continuous` response.
pub fn parse_feed_line(line: &[u8]) -> Result<FeedLine, serde_json::Error> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(FeedLine::Heartbeat);
    }

    let parsed: ChangesLine = serde_json::from_slice(line)?;
    if parsed.seq.is_none() && parsed.last_seq.is_some() {
        return Ok(FeedLine::End {
            last_seq: parsed.last_seq.map(seq_token),
        });
    }

    let event = parsed
        .doc
        .and_then(|doc| serde_json::from_value::<CouchDocument>(doc).ok())
        .map(|mut doc| {
            doc.deleted |= parsed.deleted;
            doc.into_event()
        });

    Ok(FeedLine::Change {
        seq: parsed.seq.map(seq_token),
        event,
    })
}
