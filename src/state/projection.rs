use indexmap::IndexMap;
use tracing::warn;

use crate::{
    dao::models::{ChangeEvent, ChangeKind, ChangeRow, EstimateEntity, ParticipantEntity, RoomEntity},
    state::{
        phase::RoomPhase,
        room::{Estimate, Participant, Topic},
    },
};

/// Local view of one room: the state every connected client converges to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomProjection {
    pub room_id: String,
    pub phase: RoomPhase,
    pub topic: Topic,
    /// Roster in join order.
    pub participants: IndexMap<String, Participant>,
    /// Current round's estimates keyed by participant id.
    pub estimates: IndexMap<String, Estimate>,
    /// Number of times this client has seen the room enter voting.
    pub round: u64,
}

impl RoomProjection {
    /// Empty projection of a room that has not been fetched yet.
    pub fn empty(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            phase: RoomPhase::Setup,
            topic: Topic::default(),
            participants: IndexMap::new(),
            estimates: IndexMap::new(),
            round: 0,
        }
    }

    /// Build the projection from the rows returned by the initial fetch.
    ///
    /// Rows that do not convert into domain values are skipped.
    pub fn seed(
        room: &RoomEntity,
        participants: Vec<ParticipantEntity>,
        estimates: Vec<EstimateEntity>,
    ) -> Self {
        let mut projection = Self::empty(room.id.clone());
        projection.phase = room.phase;
        projection.topic = Topic::from(room);
        if room.phase == RoomPhase::Voting {
            projection.round = 1;
        }

        for row in participants {
            projection.apply(&ChangeEvent::insert(row));
        }
        for row in estimates {
            projection.apply(&ChangeEvent::insert(row));
        }
        projection
    }

    /// Replace every row with a fresh fetch of the room, after change events were lost.
    ///
    /// The round counter carries over and advances when the fetch shows voting resumed.
    pub fn resync(
        &mut self,
        room: &RoomEntity,
        participants: Vec<ParticipantEntity>,
        estimates: Vec<EstimateEntity>,
    ) -> bool {
        let mut fresh = Self::seed(room, participants, estimates);
        fresh.round = self.round;
        if fresh.phase == RoomPhase::Voting && self.phase != RoomPhase::Voting {
            fresh.round += 1;
        }
        if fresh == *self {
            return false;
        }
        *self = fresh;
        true
    }

    /// True when the roster is non-empty and every participant has an estimate.
    pub fn all_voted(&self) -> bool {
        !self.participants.is_empty()
            && self
                .participants
                .keys()
                .all(|id| self.estimates.contains_key(id))
    }

    pub fn has_estimate(&self, participant_id: &str) -> bool {
        self.estimates.contains_key(participant_id)
    }

    /// Human in charge of the simulated voters: the one with the smallest id, so every client
    /// elects the same driver once rosters agree.
    pub fn simulated_driver(&self) -> Option<&str> {
        self.participants
            .values()
            .filter(|participant| !participant.is_simulated())
            .map(|participant| participant.id.as_str())
            .min()
    }

    /// Simulated participants that still owe an estimate this round, in roster order.
    pub fn simulated_without_estimate(&self) -> Vec<Participant> {
        self.participants
            .values()
            .filter(|participant| participant.is_simulated())
            .filter(|participant| !self.has_estimate(&participant.id))
            .cloned()
            .collect()
    }

    /// Apply one change event in place. Returns whether the projection changed.
    ///
    /// Events are applied last-writer-wins in delivery order; replaying an event that is
    /// already reflected (such as the echo of a local write) leaves the projection untouched.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        if event.room_id() != self.room_id {
            return false;
        }

        match (&event.row, event.kind) {
            (ChangeRow::Room(_), ChangeKind::Delete) => false,
            (ChangeRow::Room(room), _) => self.apply_room(room),
            (ChangeRow::Participant(row), ChangeKind::Delete) => self.remove_participant(&row.id),
            (ChangeRow::Participant(row), kind) => match Participant::try_from(row.clone()) {
                Ok(participant) => self.put_participant(participant, kind == ChangeKind::Update),
                Err(err) => {
                    warn!(room_id = %self.room_id, error = %err, "ignoring participant row");
                    false
                }
            },
            (ChangeRow::Estimate(row), ChangeKind::Delete) => {
                self.estimates.shift_remove(&row.participant_id).is_some()
            }
            (ChangeRow::Estimate(row), _) => {
                let estimate = Estimate::from(row.clone());
                if self.estimates.get(&estimate.participant_id) == Some(&estimate) {
                    return false;
                }
                self.estimates
                    .insert(estimate.participant_id.clone(), estimate);
                true
            }
        }
    }

    fn apply_room(&mut self, room: &RoomEntity) -> bool {
        let topic = Topic::from(room);
        if self.phase == room.phase && self.topic == topic {
            return false;
        }

        if room.phase == RoomPhase::Voting && self.phase != RoomPhase::Voting {
            self.round += 1;
        }
        self.phase = room.phase;
        self.topic = topic;
        true
    }

    fn put_participant(&mut self, participant: Participant, replace: bool) -> bool {
        match self.participants.get_mut(&participant.id) {
            Some(existing) if replace && *existing != participant => {
                *existing = participant;
                true
            }
            Some(_) => false,
            None => {
                self.participants
                    .insert(participant.id.clone(), participant);
                true
            }
        }
    }

    fn remove_participant(&mut self, participant_id: &str) -> bool {
        let removed = self.participants.shift_remove(participant_id).is_some();
        let estimate_removed = self.estimates.shift_remove(participant_id).is_some();
        removed || estimate_removed
    }
}

/// Pure reducer: the projection that results from applying `event` to `projection`.
pub fn reduce(mut projection: RoomProjection, event: &ChangeEvent) -> RoomProjection {
    projection.apply(event);
    projection
}
