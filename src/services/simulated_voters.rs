//! Drives the simulated participants of a room: once per round, each one waits a little,
//! asks the oracle for an estimate and casts it.
//!
//! Only the client elected by [`RoomProjection::simulated_driver`] runs passes, so a room
//! shared by several clients asks the oracle once per simulated participant.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info};

use crate::{
    config::VoteDelay,
    oracle::OracleAdapter,
    services::room_engine::RoomEngine,
    state::{
        phase::RoomPhase,
        projection::RoomProjection,
        room::{EstimateValue, Participant, Topic},
    },
};

/// Start the scheduler of one room. Abort the returned handle to stop it.
pub fn spawn(engine: RoomEngine, oracle: Arc<OracleAdapter>, delay: VoteDelay) -> JoinHandle<()> {
    tokio::spawn(run(engine, oracle, delay))
}

fn needs_pass(projection: &RoomProjection, local_id: &str) -> bool {
    projection.phase == RoomPhase::Voting
        && projection.simulated_driver() == Some(local_id)
        && projection
            .participants
            .values()
            .any(|participant| participant.is_simulated() && !projection.has_estimate(&participant.id))
}

/// React to every projection change. Passes run inline, so at most one is in flight.
async fn run(engine: RoomEngine, oracle: Arc<OracleAdapter>, delay: VoteDelay) {
    let mut updates = engine.subscribe();
    loop {
        let pending = needs_pass(&updates.borrow_and_update(), &engine.local_participant().id);
        if pending {
            run_pass(&engine, &oracle, delay).await;
            continue;
        }
        if updates.changed().await.is_err() {
            break;
        }
    }
    debug!(room_id = %engine.room_id(), "simulated voters stopped");
}

async fn run_pass(engine: &RoomEngine, oracle: &OracleAdapter, delay: VoteDelay) {
    let (round, pending) = {
        let projection = engine.snapshot();
        (projection.round, projection.simulated_without_estimate())
    };
    info!(room_id = %engine.room_id(), round, pending = pending.len(), "simulated voting pass");

    for participant in pending {
        sleep(sample_delay(delay)).await;
        let Some(topic) = topic_if_still_pending(engine, &participant, round) else {
            continue;
        };
        let Some(persona) = participant.persona() else {
            continue;
        };

        let estimate = oracle.estimate(&topic, persona).await;
        if topic_if_still_pending(engine, &participant, round).is_none() {
            debug!(
                room_id = %engine.room_id(),
                participant_id = %participant.id,
                "round moved on during estimate, dropping it"
            );
            continue;
        }

        engine
            .cast_vote(
                &participant.id,
                EstimateValue::Point(estimate.value),
                Some(estimate.rationale),
            )
            .await;
    }
}

/// Current topic when `participant` still owes a vote for `round`.
fn topic_if_still_pending(
    engine: &RoomEngine,
    participant: &Participant,
    round: u64,
) -> Option<Topic> {
    let projection = engine.snapshot();
    let pending = projection.phase == RoomPhase::Voting
        && projection.round == round
        && projection.simulated_driver() == Some(engine.local_participant().id.as_str())
        && projection.participants.contains_key(&participant.id)
        && !projection.has_estimate(&participant.id);
    pending.then_some(projection.topic)
}

fn sample_delay(delay: VoteDelay) -> Duration {
    let min = delay.min.as_millis() as u64;
    let max = delay.max.as_millis() as u64;
    Duration::from_millis(rand::rng().random_range(min..=max))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::record_store::{RecordStore, memory::InMemoryRecordStore},
        oracle::adapter::{FALLBACK_POINT, UNAVAILABLE_RATIONALE},
        state::room::ScalePoint,
    };

    fn quick() -> VoteDelay {
        VoteDelay::new(Duration::from_millis(1), Duration::from_millis(5))
    }

    async fn room(store: &InMemoryRecordStore) -> RoomEngine {
        room_as(store, "a").await
    }

    async fn room_as(store: &InMemoryRecordStore, human: &str) -> RoomEngine {
        RoomEngine::open(
            Arc::new(store.clone()),
            "r1",
            Participant::human(human, human.to_uppercase(), ""),
            AppConfig::default().personas().to_vec(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn delay_samples_stay_in_bounds() {
        let bounds = VoteDelay::new(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..100 {
            let sample = sample_delay(bounds);
            assert!(sample >= bounds.min && sample <= bounds.max);
        }
        let fixed = VoteDelay::new(Duration::from_millis(7), Duration::from_millis(7));
        assert_eq!(sample_delay(fixed), Duration::from_millis(7));
    }

    #[tokio::test]
    async fn every_simulated_participant_votes_once_per_round() {
        let store = InMemoryRecordStore::new();
        let engine = room(&store).await;
        let voters = spawn(engine.clone(), Arc::new(OracleAdapter::disabled()), quick());

        engine.add_simulated_participants().await;
        engine.set_topic("Audit log", "Record admin actions").await;
        engine.set_phase(RoomPhase::Voting).await;
        engine
            .cast_vote("a", EstimateValue::Point(ScalePoint::Five), None)
            .await;

        let mut updates = engine.subscribe();
        timeout(Duration::from_secs(2), updates.wait_for(RoomProjection::all_voted))
            .await
            .expect("simulated voters did not finish")
            .unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.estimates.len(), 4);
        for participant in snapshot.participants.values().filter(|p| p.is_simulated()) {
            let estimate = &snapshot.estimates[&participant.id];
            assert_eq!(estimate.value, EstimateValue::Point(FALLBACK_POINT));
            assert_eq!(estimate.rationale.as_deref(), Some(UNAVAILABLE_RATIONALE));
        }
        assert_eq!(
            RecordStore::list_estimates(&store, "r1").await.unwrap().len(),
            4
        );
        voters.abort();
    }

    #[tokio::test]
    async fn nothing_happens_outside_voting() {
        let store = InMemoryRecordStore::new();
        let engine = room(&store).await;
        let voters = spawn(engine.clone(), Arc::new(OracleAdapter::disabled()), quick());

        engine.add_simulated_participants().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.snapshot().estimates.is_empty());
        voters.abort();
    }

    #[tokio::test]
    async fn votes_for_an_abandoned_round_are_dropped() {
        let store = InMemoryRecordStore::new();
        let engine = room(&store).await;
        let slow = VoteDelay::new(Duration::from_millis(100), Duration::from_millis(100));
        let voters = spawn(engine.clone(), Arc::new(OracleAdapter::disabled()), slow);

        engine.add_simulated_participants().await;
        engine.set_phase(RoomPhase::Voting).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.set_phase(RoomPhase::Revealed).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(engine.snapshot().estimates.is_empty());
        voters.abort();
    }

    #[tokio::test]
    async fn a_new_round_triggers_a_new_pass() {
        let store = InMemoryRecordStore::new();
        let engine = room(&store).await;
        let voters = spawn(engine.clone(), Arc::new(OracleAdapter::disabled()), quick());
        engine.add_simulated_participants().await;

        for _ in 0..2 {
            engine.set_phase(RoomPhase::Voting).await;
            let mut updates = engine.subscribe();
            timeout(
                Duration::from_secs(2),
                updates.wait_for(|p| p.estimates.len() == 3),
            )
            .await
            .expect("pass did not complete")
            .unwrap();
            engine.set_phase(RoomPhase::Revealed).await;
        }
        voters.abort();
    }

    #[tokio::test]
    async fn only_the_elected_client_drives_simulated_voters() {
        let store = InMemoryRecordStore::new();
        let ada = room_as(&store, "a").await;
        let bob = room_as(&store, "b").await;
        let voters = spawn(bob.clone(), Arc::new(OracleAdapter::disabled()), quick());

        bob.add_simulated_participants().await;
        bob.set_phase(RoomPhase::Voting).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bob.snapshot().estimates.is_empty());

        ada.leave().await;
        let mut updates = bob.subscribe();
        timeout(
            Duration::from_secs(2),
            updates.wait_for(|p| p.estimates.len() == 3),
        )
        .await
        .expect("remaining client never took over")
        .unwrap();
        voters.abort();
    }
}
