//! End-to-end room flow through the service layer, backed by the in-memory record store.

use std::{sync::Arc, time::Duration};

use planning_poker_back::{
    config::{AppConfig, VoteDelay},
    dao::record_store::{RecordStore, memory::InMemoryRecordStore},
    dto::room::{CastVoteRequest, ParticipantKindView, RoomSnapshot},
    identity::IdentityStore,
    oracle::OracleAdapter,
    services::room_service,
    state::{AppState, SharedState, phase::RoomPhase},
};
use tokio::time::{sleep, timeout};

async fn client(store: &InMemoryRecordStore, name: &str) -> SharedState {
    let config = AppConfig::default()
        .with_drive_simulated(true)
        .with_vote_delay(VoteDelay::new(
            Duration::from_millis(150),
            Duration::from_millis(250),
        ));
    let state = AppState::new(config, IdentityStore::ephemeral(), OracleAdapter::disabled());
    state.identity().commit_display_name(name);
    state.set_record_store(Arc::new(store.clone())).await;
    state
}

async fn wait_for_snapshot(
    state: &SharedState,
    room_id: &str,
    predicate: impl Fn(&RoomSnapshot) -> bool,
) -> RoomSnapshot {
    let poll = async {
        loop {
            let snapshot = room_service::room_snapshot(state, room_id).unwrap();
            if predicate(&snapshot) {
                return snapshot;
            }
            sleep(Duration::from_millis(20)).await;
        }
    };
    timeout(Duration::from_secs(5), poll)
        .await
        .expect("room never reached the expected state")
}

#[tokio::test]
async fn full_round_with_simulated_participants() {
    let store = InMemoryRecordStore::new();
    let ada = client(&store, "Ada").await;

    let snapshot = room_service::open_room(&ada, Some("R1".into()))
        .await
        .unwrap();
    assert_eq!(snapshot.participants.len(), 1);
    assert!(matches!(snapshot.participants[0].kind, ParticipantKindView::Human));

    let snapshot = room_service::add_simulated(&ada, "R1").await.unwrap();
    assert_eq!(snapshot.participants.len(), 4);
    let simulated = snapshot
        .participants
        .iter()
        .filter(|p| matches!(p.kind, ParticipantKindView::Simulated))
        .count();
    assert_eq!(simulated, 3);

    let snapshot = room_service::change_phase(&ada, "R1", RoomPhase::Voting)
        .await
        .unwrap();
    assert!(snapshot.participants.iter().all(|p| !p.has_voted));
    assert!(!snapshot.all_voted);

    let snapshot = room_service::cast_vote(
        &ada,
        "R1",
        CastVoteRequest {
            value: "5".into(),
        },
    )
    .await
    .unwrap();
    assert!(!snapshot.all_voted);

    let snapshot = wait_for_snapshot(&ada, "R1", |s| s.all_voted).await;
    assert!(snapshot.participants.iter().all(|p| p.has_voted));
    assert!(snapshot.participants.iter().all(|p| p.vote.is_none()));

    let revealed = room_service::change_phase(&ada, "R1", RoomPhase::Revealed)
        .await
        .unwrap();
    assert_eq!(revealed.phase, RoomPhase::Revealed);
    assert!(revealed.participants.iter().all(|p| p.vote.is_some()));
    assert_eq!(revealed.participants[0].vote.as_deref(), Some("5"));
    assert!(
        revealed.participants[1..]
            .iter()
            .all(|p| p.rationale.is_some())
    );

    let revote = room_service::change_phase(&ada, "R1", RoomPhase::Voting)
        .await
        .unwrap();
    assert!(revote.participants.iter().all(|p| !p.has_voted));
    assert!(!revote.all_voted);
    assert!(store.list_estimates("R1").await.unwrap().is_empty());

    room_service::leave_all(&ada).await;
}

#[tokio::test]
async fn two_clients_share_one_room() {
    let store = InMemoryRecordStore::new();
    let ada = client(&store, "Ada").await;
    let bob = client(&store, "Bob").await;

    let opened = room_service::open_room(&ada, None).await.unwrap();
    let room_id = opened.room_id.clone();
    room_service::open_room(&bob, Some(room_id.clone()))
        .await
        .unwrap();

    wait_for_snapshot(&ada, &room_id, |s| s.participants.len() == 2).await;

    room_service::change_phase(&bob, &room_id, RoomPhase::Voting)
        .await
        .unwrap();
    wait_for_snapshot(&ada, &room_id, |s| s.phase == RoomPhase::Voting).await;

    room_service::cast_vote(&ada, &room_id, CastVoteRequest { value: "?".into() })
        .await
        .unwrap();
    let seen_by_bob = wait_for_snapshot(&bob, &room_id, |s| {
        s.participants.iter().any(|p| !p.is_local && p.has_voted)
    })
    .await;
    assert!(seen_by_bob.participants.iter().all(|p| p.vote.is_none()));

    room_service::leave_room(&bob, &room_id).await.unwrap();
    let after = wait_for_snapshot(&ada, &room_id, |s| s.participants.len() == 1).await;
    assert!(after.participants[0].is_local);
    assert!(after.all_voted);
}
