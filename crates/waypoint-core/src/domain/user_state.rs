use crate::domain::definition::{FlowId, StepId};
use crate::DataPacket;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::definition::UserId;

/// Status of a user's progress through one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStateStatus {
    /// Execution is live
    Ongoing,

    /// Execution reached an exit step
    Completed,

    /// Execution was suspended by a caller
    Paused,

    /// Execution stopped on an error
    Error,
}

/// Details of the error that stopped an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// What went wrong
    pub message: String,

    /// The step that was executing when the error occurred
    pub step_id: Option<StepId>,

    /// When the error occurred
    pub occurred_at: DateTime<Utc>,
}

/// The durable record of one user's progress through one flow instance.
///
/// At most one record exists per `(user_id, flow_id)` pair; the state
/// store enforces this. Records are created on the first progress update,
/// mutated on every step completion, and never deleted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFlowState {
    /// The user this record belongs to
    pub user_id: UserId,

    /// The flow being executed
    pub flow_id: FlowId,

    /// The step the user is currently on
    pub current_step: Option<StepId>,

    /// The most recently completed step before the current one
    pub last_completed_step: Option<StepId>,

    /// Current execution status
    pub status: FlowStateStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Ordered record of completed steps; no immediate duplicates
    pub step_history: Vec<StepId>,

    /// Result payloads keyed by step id; keys are a subset of the history
    pub output_snapshot: HashMap<String, DataPacket>,

    /// The input that started the flow
    pub input_data: DataPacket,

    /// Set when status is Error
    pub error_info: Option<ErrorInfo>,

    /// Retries consumed so far
    pub retry_count: u32,

    /// Retry budget
    pub max_retries: u32,
}

impl UserFlowState {
    /// Create a fresh, ongoing state for a `(user, flow)` pair
    pub fn new(user_id: UserId, flow_id: FlowId) -> Self {
        let now = Utc::now();

        Self {
            user_id,
            flow_id,
            current_step: None,
            last_completed_step: None,
            status: FlowStateStatus::Ongoing,
            created_at: now,
            updated_at: now,
            step_history: Vec::new(),
            output_snapshot: HashMap::new(),
            input_data: DataPacket::null(),
            error_info: None,
            retry_count: 0,
            max_retries: 3,
        }
    }

    /// Update the timestamp
    #[inline]
    pub fn update_timestamp(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record the completion of a step.
    ///
    /// Shifts the current step into `last_completed_step`, appends to the
    /// history unless the step is already the trailing entry (repeat calls
    /// are idempotent), and overwrites the step's output snapshot entry
    /// when an output is supplied.
    pub fn record_step(&mut self, completed_step: StepId, output: Option<DataPacket>) {
        self.last_completed_step = self.current_step.take();
        self.current_step = Some(completed_step.clone());

        if self.step_history.last() != Some(&completed_step) {
            self.step_history.push(completed_step.clone());
        }

        if let Some(output) = output {
            self.output_snapshot.insert(completed_step.0, output);
        }

        self.update_timestamp();
    }

    /// Mark the execution as completed
    pub fn mark_completed(&mut self) {
        self.status = FlowStateStatus::Completed;
        self.update_timestamp();
    }

    /// Suspend the execution
    pub fn pause(&mut self) {
        self.status = FlowStateStatus::Paused;
        self.update_timestamp();
    }

    /// Resume a suspended execution
    pub fn resume(&mut self) {
        self.status = FlowStateStatus::Ongoing;
        self.update_timestamp();
    }

    /// Record an error and move the execution into the error status
    pub fn mark_error(&mut self, message: impl Into<String>, step_id: Option<StepId>) {
        self.status = FlowStateStatus::Error;
        self.error_info = Some(ErrorInfo {
            message: message.into(),
            step_id,
            occurred_at: Utc::now(),
        });
        self.update_timestamp();
    }

    /// Whether the retry budget is exhausted
    #[inline]
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Lifecycle of a single dispatch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    /// Request arrived
    Received,

    /// The step identifier was present and non-empty
    Validated,

    /// The handler was resolved
    Dispatched,

    /// The handler is running
    Executing,

    /// The handler returned a result
    Completed,

    /// No handler is registered for the step
    NotRegistered,

    /// The handler failed
    ExecutionError,
}

/// Ephemeral context for one dispatch invocation.
///
/// Built by the dispatcher, logged, and dropped; never persisted.
/// Durable cross-request state lives only in [`UserFlowState`].
#[derive(Debug, Clone, Serialize)]
pub struct StepExecutionContext {
    /// Unique id for this invocation
    pub request_id: Uuid,

    /// The step being dispatched, once known
    pub step_id: Option<StepId>,

    /// When the request arrived
    pub started_at: DateTime<Utc>,

    /// When the request reached a terminal phase
    pub finished_at: Option<DateTime<Utc>>,

    /// Where the request is in its lifecycle
    pub phase: RequestPhase,

    /// Error message for failed requests
    pub error: Option<String>,
}

impl StepExecutionContext {
    /// Create a context for a newly received request
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            step_id: None,
            started_at: Utc::now(),
            finished_at: None,
            phase: RequestPhase::Received,
            error: None,
        }
    }

    /// Move to a non-terminal phase
    #[inline]
    pub fn advance(&mut self, phase: RequestPhase) {
        self.phase = phase;
    }

    /// Move to a terminal phase and stamp the finish time
    pub fn finish(&mut self, phase: RequestPhase) {
        self.phase = phase;
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration of the request, once finished
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

impl Default for StepExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_state() -> UserFlowState {
        UserFlowState::new(UserId("u1".to_string()), FlowId("f1".to_string()))
    }

    #[test]
    fn test_new_state_defaults() {
        let state = new_state();

        assert_eq!(state.status, FlowStateStatus::Ongoing);
        assert!(state.current_step.is_none());
        assert!(state.last_completed_step.is_none());
        assert!(state.step_history.is_empty());
        assert!(state.output_snapshot.is_empty());
        assert!(state.input_data.is_null());
        assert!(state.error_info.is_none());
        assert_eq!(state.retry_count, 0);
        assert!(state.created_at <= Utc::now());
    }

    #[test]
    fn test_record_step_shifts_current_into_last_completed() {
        let mut state = new_state();

        state.record_step(StepId("A".to_string()), Some(DataPacket::new(json!({"msg": "ok"}))));
        assert_eq!(state.current_step, Some(StepId("A".to_string())));
        assert!(state.last_completed_step.is_none());

        state.record_step(StepId("B".to_string()), Some(DataPacket::new(json!({"msg": "ok2"}))));
        assert_eq!(state.current_step, Some(StepId("B".to_string())));
        assert_eq!(state.last_completed_step, Some(StepId("A".to_string())));
        assert_eq!(
            state.step_history,
            vec![StepId("A".to_string()), StepId("B".to_string())]
        );
        assert_eq!(state.output_snapshot["A"].as_value()["msg"], "ok");
        assert_eq!(state.output_snapshot["B"].as_value()["msg"], "ok2");
    }

    #[test]
    fn test_record_step_idempotent_on_trailing_duplicate() {
        let mut state = new_state();

        state.record_step(StepId("A".to_string()), Some(DataPacket::new(json!({"try": 1}))));
        state.record_step(StepId("A".to_string()), Some(DataPacket::new(json!({"try": 2}))));

        // No duplicate trailing entry; the output reflects the last write
        assert_eq!(state.step_history, vec![StepId("A".to_string())]);
        assert_eq!(state.output_snapshot["A"].as_value()["try"], 2);
    }

    #[test]
    fn test_record_step_without_output_keeps_snapshot() {
        let mut state = new_state();

        state.record_step(StepId("A".to_string()), Some(DataPacket::new(json!({"kept": true}))));
        state.record_step(StepId("A".to_string()), None);

        assert_eq!(state.output_snapshot["A"].as_value()["kept"], true);
    }

    #[test]
    fn test_status_transitions() {
        let mut state = new_state();

        state.pause();
        assert_eq!(state.status, FlowStateStatus::Paused);

        state.resume();
        assert_eq!(state.status, FlowStateStatus::Ongoing);

        state.mark_completed();
        assert_eq!(state.status, FlowStateStatus::Completed);
    }

    #[test]
    fn test_mark_error_records_details() {
        let mut state = new_state();

        state.mark_error("handler blew up", Some(StepId("B".to_string())));

        assert_eq!(state.status, FlowStateStatus::Error);
        let info = state.error_info.as_ref().unwrap();
        assert_eq!(info.message, "handler blew up");
        assert_eq!(info.step_id, Some(StepId("B".to_string())));
    }

    #[test]
    fn test_retries_exhausted() {
        let mut state = new_state();
        assert!(!state.retries_exhausted());

        state.retry_count = state.max_retries;
        assert!(state.retries_exhausted());
    }

    #[test]
    fn test_state_serialization_round_trip() {
        let mut state = new_state();
        state.record_step(StepId("A".to_string()), Some(DataPacket::new(json!({"v": 1}))));
        state.input_data = DataPacket::new(json!({"email": "user@example.com"}));

        let serialized = serde_json::to_string(&state).unwrap();
        let deserialized: UserFlowState = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized, state);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let ongoing = serde_json::to_string(&FlowStateStatus::Ongoing).unwrap();
        assert_eq!(ongoing, "\"ongoing\"");

        let error: FlowStateStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(error, FlowStateStatus::Error);
    }

    #[test]
    fn test_execution_context_lifecycle() {
        let mut ctx = StepExecutionContext::new();
        assert_eq!(ctx.phase, RequestPhase::Received);
        assert!(ctx.finished_at.is_none());
        assert!(ctx.duration_ms().is_none());

        ctx.advance(RequestPhase::Validated);
        ctx.advance(RequestPhase::Dispatched);
        ctx.advance(RequestPhase::Executing);
        ctx.finish(RequestPhase::Completed);

        assert_eq!(ctx.phase, RequestPhase::Completed);
        assert!(ctx.finished_at.is_some());
        assert!(ctx.duration_ms().unwrap() >= 0);
    }
}
