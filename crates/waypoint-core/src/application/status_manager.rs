//! Durable status tracking for per-user flow executions.
//!
//! The status manager is the only component that writes to the state
//! store. It exposes snapshot and recovery projections so diagnostics
//! and resumption callers never mutate state by accident.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::definition::{FlowId, StepId, UserId};
use crate::domain::repository::{StateRevision, UserFlowStateRepository};
use crate::domain::user_state::{ErrorInfo, FlowStateStatus, UserFlowState};
use crate::{CoreError, DataPacket};

/// Read-only projection of a user flow state.
///
/// `exists` is false (and every other field empty) when no record is
/// stored for the pair.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowSnapshot {
    /// Whether a record exists for the pair
    pub exists: bool,

    /// The user the record belongs to
    pub user_id: Option<UserId>,

    /// The flow being executed
    pub flow_id: Option<FlowId>,

    /// The step the user is currently on
    pub current_step: Option<StepId>,

    /// The most recently completed prior step
    pub last_completed_step: Option<StepId>,

    /// Current execution status
    pub status: Option<FlowStateStatus>,

    /// Creation timestamp
    pub created_at: Option<DateTime<Utc>>,

    /// Last updated timestamp
    pub updated_at: Option<DateTime<Utc>>,

    /// Ordered record of completed steps
    pub step_history: Vec<StepId>,

    /// Result payloads keyed by step id
    pub output_snapshot: HashMap<String, DataPacket>,

    /// The input that started the flow
    pub input_data: Option<DataPacket>,

    /// Error details, if the execution stopped on an error
    pub error_info: Option<ErrorInfo>,

    /// Retries consumed so far
    pub retry_count: u32,

    /// Retry budget
    pub max_retries: u32,
}

impl From<UserFlowState> for FlowSnapshot {
    fn from(state: UserFlowState) -> Self {
        Self {
            exists: true,
            user_id: Some(state.user_id),
            flow_id: Some(state.flow_id),
            current_step: state.current_step,
            last_completed_step: state.last_completed_step,
            status: Some(state.status),
            created_at: Some(state.created_at),
            updated_at: Some(state.updated_at),
            step_history: state.step_history,
            output_snapshot: state.output_snapshot,
            input_data: Some(state.input_data),
            error_info: state.error_info,
            retry_count: state.retry_count,
            max_retries: state.max_retries,
        }
    }
}

/// What a caller needs to resume an interrupted flow.
///
/// `success` is false (and every other field empty) when no record
/// exists for the pair; recovery is non-destructive and this call
/// never mutates state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreContext {
    /// Whether a record existed to restore from
    pub success: bool,

    /// The step execution should resume at
    pub restore_to_step: Option<StepId>,

    /// The step completed before the interruption
    pub previous_step: Option<StepId>,

    /// Output of the previously completed step, if any was recorded
    pub available_output: Option<DataPacket>,

    /// Ordered record of completed steps
    pub step_history: Vec<StepId>,

    /// The input that started the flow
    pub original_input: Option<DataPacket>,

    /// Execution status at the time of the snapshot
    pub flow_status: Option<FlowStateStatus>,
}

/// Service for durable CRUD over per-user flow execution records
pub struct StatusManager {
    /// Repository for user flow states
    repository: Arc<dyn UserFlowStateRepository>,
}

impl StatusManager {
    /// Create a new status manager
    pub fn new(repository: Arc<dyn UserFlowStateRepository>) -> Self {
        Self { repository }
    }

    /// Read the state for a `(user, flow)` pair
    pub async fn get_user_flow_state(
        &self,
        user_id: &UserId,
        flow_id: &FlowId,
    ) -> Result<Option<UserFlowState>, CoreError> {
        self.repository.find(user_id, flow_id).await
    }

    /// The user's active flow state.
    ///
    /// Selection policy: the ongoing state with the most recent
    /// `updated_at`; equal timestamps break ties by flow id so repeated
    /// calls are deterministic.
    pub async fn get_active_flow_state(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserFlowState>, CoreError> {
        let states = self.repository.find_all_for_user(user_id).await?;

        Ok(states
            .into_iter()
            .filter(|state| state.status == FlowStateStatus::Ongoing)
            .max_by(|a, b| {
                a.updated_at
                    .cmp(&b.updated_at)
                    .then_with(|| a.flow_id.0.cmp(&b.flow_id.0))
            }))
    }

    /// Upsert a state record; prior values are archived by the store
    pub async fn save_user_flow_state(&self, state: &UserFlowState) -> Result<(), CoreError> {
        self.repository.save(state).await
    }

    /// Record the completion of a step for a `(user, flow)` pair.
    ///
    /// Creates the state lazily on first update. Repeat calls for the
    /// same step are idempotent on the history; the step's output
    /// snapshot entry is overwritten when an output is supplied.
    pub async fn update_flow_progress(
        &self,
        user_id: &UserId,
        flow_id: &FlowId,
        completed_step: &StepId,
        step_output: Option<DataPacket>,
    ) -> Result<(), CoreError> {
        let mut state = self
            .repository
            .find(user_id, flow_id)
            .await?
            .unwrap_or_else(|| UserFlowState::new(user_id.clone(), flow_id.clone()));

        state.record_step(completed_step.clone(), step_output);
        self.repository.save(&state).await?;

        debug!(
            user_id = %user_id.0,
            flow_id = %flow_id.0,
            step_id = %completed_step.0,
            history_len = state.step_history.len(),
            "Flow progress updated"
        );
        Ok(())
    }

    /// Read-only projection of the full state for diagnostics and as
    /// the basis for recovery
    pub async fn get_flow_snapshot(
        &self,
        user_id: &UserId,
        flow_id: &FlowId,
    ) -> Result<FlowSnapshot, CoreError> {
        let state = self.repository.find(user_id, flow_id).await?;

        Ok(state.map(FlowSnapshot::from).unwrap_or_default())
    }

    /// Compute what a caller needs to resume an interrupted flow,
    /// without mutating anything.
    ///
    /// `target_step` overrides the recorded current step as the resume
    /// point.
    pub async fn restore_flow_context(
        &self,
        user_id: &UserId,
        flow_id: &FlowId,
        target_step: Option<&StepId>,
    ) -> Result<RestoreContext, CoreError> {
        let Some(state) = self.repository.find(user_id, flow_id).await? else {
            debug!(
                user_id = %user_id.0,
                flow_id = %flow_id.0,
                "No state to restore"
            );
            return Ok(RestoreContext::default());
        };

        let available_output = state
            .last_completed_step
            .as_ref()
            .and_then(|step| state.output_snapshot.get(&step.0).cloned());

        Ok(RestoreContext {
            success: true,
            restore_to_step: target_step.cloned().or(state.current_step),
            previous_step: state.last_completed_step,
            available_output,
            step_history: state.step_history,
            original_input: Some(state.input_data),
            flow_status: Some(state.status),
        })
    }

    /// Archived revisions for a `(user, flow)` pair, oldest first
    pub async fn get_state_revisions(
        &self,
        user_id: &UserId,
        flow_id: &FlowId,
    ) -> Result<Vec<StateRevision>, CoreError> {
        self.repository.archived_revisions(user_id, flow_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::memory::MemoryUserFlowStateRepository;
    use serde_json::json;

    fn manager() -> StatusManager {
        StatusManager::new(Arc::new(MemoryUserFlowStateRepository::new()))
    }

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
    async fn test_update_creates_state_lazily() {
        let manager = manager();

        manager
            .update_flow_progress(
                &user("u1"),
                &flow("F1"),
                &step("A"),
                Some(DataPacket::new(json!({"msg": "ok"}))),
            )
            .await
            .unwrap();

        let state = manager
            .get_user_flow_state(&user("u1"), &flow("F1"))
            .await
            .unwrap()
            .expect("state should have been created");

        assert_eq!(state.current_step, Some(step("A")));
        assert!(state.last_completed_step.is_none());
        assert_eq!(state.status, FlowStateStatus::Ongoing);
    }

    #[tokio::test]
    async fn test_two_step_progress_scenario() {
        let manager = manager();

        manager
            .update_flow_progress(
                &user("u1"),
                &flow("F1"),
                &step("A"),
                Some(DataPacket::new(json!({"msg": "ok"}))),
            )
            .await
            .unwrap();
        manager
            .update_flow_progress(
                &user("u1"),
                &flow("F1"),
                &step("B"),
                Some(DataPacket::new(json!({"msg": "ok2"}))),
            )
            .await
            .unwrap();

        let state = manager
            .get_user_flow_state(&user("u1"), &flow("F1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state.step_history, vec![step("A"), step("B")]);
        assert_eq!(state.current_step, Some(step("B")));
        assert_eq!(state.last_completed_step, Some(step("A")));
        assert_eq!(state.output_snapshot["A"].as_value()["msg"], "ok");
        assert_eq!(state.output_snapshot["B"].as_value()["msg"], "ok2");
    }

    #[tokio::test]
    async fn test_update_is_idempotent_for_repeat_step() {
        let manager = manager();

        for attempt in 1..=2 {
            manager
                .update_flow_progress(
                    &user("u1"),
                    &flow("F1"),
                    &step("A"),
                    Some(DataPacket::new(json!({"attempt": attempt}))),
                )
                .await
                .unwrap();
        }

        let state = manager
            .get_user_flow_state(&user("u1"), &flow("F1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state.step_history, vec![step("A")]);
        // Last write wins on the snapshot
        assert_eq!(state.output_snapshot["A"].as_value()["attempt"], 2);
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_state() {
        let manager = manager();

        let snapshot = manager
            .get_flow_snapshot(&user("nobody"), &flow("F1"))
            .await
            .unwrap();

        assert!(!snapshot.exists);
        assert!(snapshot.user_id.is_none());
        assert!(snapshot.step_history.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_projects_all_fields() {
        let manager = manager();

        manager
            .update_flow_progress(
                &user("u1"),
                &flow("F1"),
                &step("A"),
                Some(DataPacket::new(json!({"v": 1}))),
            )
            .await
            .unwrap();

        let snapshot = manager
            .get_flow_snapshot(&user("u1"), &flow("F1"))
            .await
            .unwrap();

        assert!(snapshot.exists);
        assert_eq!(snapshot.user_id, Some(user("u1")));
        assert_eq!(snapshot.flow_id, Some(flow("F1")));
        assert_eq!(snapshot.current_step, Some(step("A")));
        assert_eq!(snapshot.status, Some(FlowStateStatus::Ongoing));
        assert_eq!(snapshot.step_history, vec![step("A")]);
        assert!(snapshot.output_snapshot.contains_key("A"));
    }

    #[tokio::test]
    async fn test_restore_context_for_missing_state() {
        let manager = manager();

        let context = manager
            .restore_flow_context(&user("nobody"), &flow("F1"), None)
            .await
            .unwrap();

        assert!(!context.success);
        assert!(context.restore_to_step.is_none());
        assert!(context.step_history.is_empty());
    }

    #[tokio::test]
    async fn test_restore_context_resumes_at_current_step() {
        let manager = manager();

        manager
            .update_flow_progress(
                &user("u1"),
                &flow("F1"),
                &step("A"),
                Some(DataPacket::new(json!({"token": "abc"}))),
            )
            .await
            .unwrap();
        manager
            .update_flow_progress(&user("u1"), &flow("F1"), &step("B"), None)
            .await
            .unwrap();

        let context = manager
            .restore_flow_context(&user("u1"), &flow("F1"), None)
            .await
            .unwrap();

        assert!(context.success);
        assert_eq!(context.restore_to_step, Some(step("B")));
        assert_eq!(context.previous_step, Some(step("A")));
        assert_eq!(
            context.available_output.unwrap().as_value()["token"],
            "abc"
        );
        assert_eq!(context.step_history, vec![step("A"), step("B")]);
        assert_eq!(context.flow_status, Some(FlowStateStatus::Ongoing));
    }

    #[tokio::test]
    async fn test_restore_context_honours_target_step() {
        let manager = manager();

        manager
            .update_flow_progress(&user("u1"), &flow("F1"), &step("B"), None)
            .await
            .unwrap();

        let context = manager
            .restore_flow_context(&user("u1"), &flow("F1"), Some(&step("A")))
            .await
            .unwrap();

        assert!(context.success);
        assert_eq!(context.restore_to_step, Some(step("A")));
    }

    #[tokio::test]
    async fn test_restore_does_not_mutate_state() {
        let manager = manager();

        manager
            .update_flow_progress(&user("u1"), &flow("F1"), &step("A"), None)
            .await
            .unwrap();
        let before = manager
            .get_user_flow_state(&user("u1"), &flow("F1"))
            .await
            .unwrap()
            .unwrap();

        manager
            .restore_flow_context(&user("u1"), &flow("F1"), None)
            .await
            .unwrap();

        let after = manager
            .get_user_flow_state(&user("u1"), &flow("F1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_active_flow_is_most_recently_updated_ongoing() {
        let manager = manager();

        manager
            .update_flow_progress(&user("u1"), &flow("F1"), &step("A"), None)
            .await
            .unwrap();
        manager
            .update_flow_progress(&user("u1"), &flow("F2"), &step("X"), None)
            .await
            .unwrap();

        // F2 was touched last
        let active = manager
            .get_active_flow_state(&user("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.flow_id, flow("F2"));

        // Completing F2 leaves F1 as the only ongoing candidate
        let mut done = active;
        done.mark_completed();
        manager.save_user_flow_state(&done).await.unwrap();

        let active = manager
            .get_active_flow_state(&user("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.flow_id, flow("F1"));
    }

    #[tokio::test]
    async fn test_active_flow_none_for_unknown_user() {
        let manager = manager();
        let active = manager.get_active_flow_state(&user("nobody")).await.unwrap();
        assert!(active.is_none());
    }

    #[tokio::test]
    async fn test_save_round_trip_advances_updated_at() {
        let manager = manager();
        let mut state = UserFlowState::new(user("u1"), flow("F1"));
        state.input_data = DataPacket::new(json!({"seed": true}));
        let before = state.updated_at;

        manager.save_user_flow_state(&state).await.unwrap();
        let loaded = manager
            .get_user_flow_state(&user("u1"), &flow("F1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.user_id, state.user_id);
        assert_eq!(loaded.flow_id, state.flow_id);
        assert_eq!(loaded.input_data, state.input_data);
        assert_eq!(loaded.created_at, state.created_at);
        assert!(loaded.updated_at > before);
    }

    #[tokio::test]
    async fn test_revisions_accumulate_in_order() {
        let manager = manager();

        manager
            .update_flow_progress(&user("u1"), &flow("F1"), &step("A"), None)
            .await
            .unwrap();
        manager
            .update_flow_progress(&user("u1"), &flow("F1"), &step("B"), None)
            .await
            .unwrap();
        manager
            .update_flow_progress(&user("u1"), &flow("F1"), &step("C"), None)
            .await
            .unwrap();

        let revisions = manager
            .get_state_revisions(&user("u1"), &flow("F1"))
            .await
            .unwrap();

        // One revision per overwriting save, oldest first
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].state.step_history, vec![step("A")]);
        assert_eq!(
            revisions[1].state.step_history,
            vec![step("A"), step("B")]
        );
    }
}
