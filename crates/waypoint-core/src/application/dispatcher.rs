//! Step request dispatch.
//!
//! The dispatcher resolves the handler for an inbound step request via
//! the registry, invokes it, and wraps the outcome in a structured
//! envelope. Every path returns a well-formed envelope; handler
//! failures are caught exactly once, at this boundary.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::definition::StepId;
use crate::domain::user_state::{RequestPhase, StepExecutionContext};
use crate::registry::FlowRegistry;
use crate::DataPacket;

/// Terminal status of a dispatch envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// The handler ran and returned a result
    Success,

    /// No handler is registered for the step
    HandlerNotFound,

    /// The request was rejected or the handler failed
    ExecutionError,
}

/// Response envelope for one dispatch request
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResponse {
    /// Terminal status
    pub status: DispatchStatus,

    /// The step the request addressed, once known
    pub step_id: Option<StepId>,

    /// The handler's result payload, on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DataPacket>,

    /// What went wrong, on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Remediation hint for unresolved steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl DispatchResponse {
    fn success(step_id: StepId, result: DataPacket) -> Self {
        Self {
            status: DispatchStatus::Success,
            step_id: Some(step_id),
            result: Some(result),
            error: None,
            suggestion: None,
        }
    }

    fn handler_not_found(step_id: StepId) -> Self {
        let suggestion = format!(
            "Step '{}' is not registered; check the owning module's registration",
            step_id.0
        );
        Self {
            status: DispatchStatus::HandlerNotFound,
            step_id: Some(step_id),
            result: None,
            error: None,
            suggestion: Some(suggestion),
        }
    }

    fn execution_error(step_id: Option<StepId>, error: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::ExecutionError,
            step_id,
            result: None,
            error: Some(error.into()),
            suggestion: None,
        }
    }
}

/// Dispatches inbound step requests to registered handlers
pub struct StepDispatcher {
    /// Registry used to resolve handlers
    registry: Arc<FlowRegistry>,
}

impl StepDispatcher {
    /// Create a new dispatcher over a registry
    pub fn new(registry: Arc<FlowRegistry>) -> Self {
        Self { registry }
    }

    /// Dispatch one step request.
    ///
    /// The request is an object of the form `{step_id, ...payload}`.
    /// A missing or empty step identifier is rejected before the
    /// registry is consulted; an unresolved step returns
    /// `handler_not_found` without any state-store access. Handler
    /// errors and panics are converted to `execution_error` envelopes,
    /// never propagated.
    pub async fn dispatch(&self, request: DataPacket) -> DispatchResponse {
        let mut ctx = StepExecutionContext::new();

        // Fast-fail before touching the registry
        let step_id = request
            .as_object()
            .and_then(|object| object.get("step_id"))
            .and_then(|value| value.as_str())
            .unwrap_or("")
            .to_string();
        if step_id.is_empty() {
            ctx.finish(RequestPhase::ExecutionError);
            warn!(request_id = %ctx.request_id, "Dispatch rejected: missing step identifier");
            return DispatchResponse::execution_error(None, "missing step identifier");
        }

        let step_id = StepId(step_id);
        ctx.step_id = Some(step_id.clone());
        ctx.advance(RequestPhase::Validated);

        let handler = self
            .registry
            .get_step(&step_id)
            .and_then(|step| step.handler);
        let Some(handler) = handler else {
            ctx.finish(RequestPhase::NotRegistered);
            warn!(
                request_id = %ctx.request_id,
                step_id = %step_id.0,
                "Dispatch failed: no handler registered"
            );
            return DispatchResponse::handler_not_found(step_id);
        };
        ctx.advance(RequestPhase::Dispatched);

        // The payload is the request minus the step identifier
        let payload = strip_step_id(&request);

        ctx.advance(RequestPhase::Executing);
        let outcome = AssertUnwindSafe(handler.handle(payload)).catch_unwind().await;

        match outcome {
            Ok(Ok(result)) => {
                ctx.finish(RequestPhase::Completed);
                debug!(
                    request_id = %ctx.request_id,
                    step_id = %step_id.0,
                    duration_ms = ctx.duration_ms().unwrap_or(0),
                    "Step dispatched"
                );
                DispatchResponse::success(step_id, result)
            }
            Ok(Err(error)) => {
                ctx.finish(RequestPhase::ExecutionError);
                warn!(
                    request_id = %ctx.request_id,
                    step_id = %step_id.0,
                    error = %error,
                    "Step handler failed"
                );
                DispatchResponse::execution_error(Some(step_id), error.to_string())
            }
            Err(panic) => {
                ctx.finish(RequestPhase::ExecutionError);
                let message = panic_message(panic);
                warn!(
                    request_id = %ctx.request_id,
                    step_id = %step_id.0,
                    error = %message,
                    "Step handler panicked"
                );
                DispatchResponse::execution_error(
                    Some(step_id),
                    format!("handler panicked: {}", message),
                )
            }
        }
    }
}

fn strip_step_id(request: &DataPacket) -> DataPacket {
    match request.as_object() {
        Some(object) => {
            let mut payload = object.clone();
            payload.remove("step_id");
            DataPacket::new(serde_json::Value::Object(payload))
        }
        None => request.clone(),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
