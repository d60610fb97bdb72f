use std::sync::Arc;

use serde_json::json;
use waypoint_core::domain::definition::{FlowId, StepId, UserId};
use waypoint_core::domain::user_state::UserFlowState;
use waypoint_core::{DataPacket, StatusManager};

use crate::InMemoryStateStoreProvider;

fn user(id: &str) -> UserId {
    UserId(id.to_string())
}

fn flow(id: &str) -> FlowId {
    FlowId(id.to_string())
}

fn step(id: &str) -> StepId {
    StepId(id.to_string())
}

#[tokio::test]
async fn test_save_and_find_round_trip() {
    let provider = InMemoryStateStoreProvider::new();
    let repo = provider.create_repository();

    let mut state = UserFlowState::new(user("u1"), flow("F1"));
    state.input_data = DataPacket::new(json!({"email": "user@example.com"}));
    state.record_step(step("A"), Some(DataPacket::new(json!({"v": 1}))));
    let before = state.updated_at;

    repo.save(&state).await.unwrap();
    let loaded = repo.find(&user("u1"), &flow("F1")).await.unwrap().unwrap();

    assert_eq!(loaded.step_history, state.step_history);
    assert_eq!(loaded.output_snapshot, state.output_snapshot);
    assert_eq!(loaded.input_data, state.input_data);
    assert_eq!(loaded.created_at, state.created_at);
    assert!(loaded.updated_at > before);
}

#[tokio::test]
async fn test_handles_share_storage() {
    let provider = InMemoryStateStoreProvider::new();
    let writer = provider.create_repository();
    let reader = provider.create_repository();

    writer
        .save(&UserFlowState::new(user("u1"), flow("F1")))
        .await
        .unwrap();

    let found = reader.find(&user("u1"), &flow("F1")).await.unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn test_overwrite_archives_every_prior_revision() {
    let provider = InMemoryStateStoreProvider::new();
    let repo = provider.create_repository();

    let mut state = UserFlowState::new(user("u1"), flow("F1"));
    for id in ["A", "B", "C"] {
        state.record_step(step(id), None);
        repo.save(&state).await.unwrap();
    }

    let revisions = repo
        .archived_revisions(&user("u1"), &flow("F1"))
        .await
        .unwrap();

    // One revision per overwriting save, oldest first
    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[0].state.step_history, vec![step("A")]);
    assert_eq!(revisions[1].state.step_history, vec![step("A"), step("B")]);
    assert!(revisions[0].archived_at <= revisions[1].archived_at);
}

#[tokio::test]
async fn test_concurrent_saves_keep_one_record_per_pair() {
    let provider = InMemoryStateStoreProvider::new();
    let repo = provider.create_repository();

    let mut handles = Vec::new();
    for i in 0..16 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            let mut state = UserFlowState::new(user("u1"), flow("F1"));
            state.retry_count = i;
            repo.save(&state).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let states = repo.find_all_for_user(&user("u1")).await.unwrap();
    assert_eq!(states.len(), 1);

    // Every overwrite archived the record it replaced
    let revisions = repo
        .archived_revisions(&user("u1"), &flow("F1"))
        .await
        .unwrap();
    assert_eq!(revisions.len(), 15);
}

#[tokio::test]
async fn test_status_manager_over_provider() {
    let provider = InMemoryStateStoreProvider::new();
    let manager = StatusManager::new(provider.create_repository());

    manager
        .update_flow_progress(
            &user("u1"),
            &flow("F1"),
            &step("A"),
            Some(DataPacket::new(json!({"msg": "ok"}))),
        )
        .await
        .unwrap();

    let snapshot = manager
        .get_flow_snapshot(&user("u1"), &flow("F1"))
        .await
        .unwrap();
    assert!(snapshot.exists);
    assert_eq!(snapshot.step_history, vec![step("A")]);

    let missing = manager
        .get_flow_snapshot(&user("u2"), &flow("F1"))
        .await
        .unwrap();
    assert!(!missing.exists);
}

#[tokio::test]
async fn test_find_all_for_user_filters_by_user() {
    let provider = InMemoryStateStoreProvider::new();
    let repo = provider.create_repository();

    repo.save(&UserFlowState::new(user("u1"), flow("F1"))).await.unwrap();
    repo.save(&UserFlowState::new(user("u1"), flow("F2"))).await.unwrap();
    repo.save(&UserFlowState::new(user("u2"), flow("F1"))).await.unwrap();

    let states = repo.find_all_for_user(&user("u1")).await.unwrap();
    assert_eq!(states.len(), 2);
    assert!(states.iter().all(|s| s.user_id == user("u1")));
}
