//!
//! Waypoint Core - multi-step flow orchestration engine
//!
//! This crate defines the flow/step registry, the step dispatcher, the
//! durable per-user status manager, and the module self-registration
//! adapter. It routes, tracks, and validates structure; the business
//! handlers behind each step live in external modules and reach the
//! core only through the [`StepHandler`] contract.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Domain layer - definitions, user state, and repository contracts
pub mod domain;

/// Application services - dispatch, status tracking, module registration
pub mod application;

/// Flow/step registry and integrity validation
pub mod registry;

/// Core types
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::CoreError;
pub use types::DataPacket;

// Re-export main API types for easy use
pub use application::dispatcher::{DispatchResponse, DispatchStatus, StepDispatcher};
pub use application::module_loader::{
    block_on_with_timeout, ModuleManifest, ModuleRecord, ModuleRegistrar, RegistrarConfig,
    RegistrationCallback, RegistrationStatus,
};
pub use application::status_manager::{FlowSnapshot, RestoreContext, StatusManager};
pub use domain::definition::{
    FlowDefinition, FlowId, FlowType, ModuleName, StepDefinition, StepId, UserId,
};
pub use domain::repository::{StateRevision, UserFlowStateRepository};
pub use domain::user_state::{
    ErrorInfo, FlowStateStatus, RequestPhase, StepExecutionContext, UserFlowState,
};
pub use registry::integrity::{
    BrokenLink, FlowIntegrityReport, FlowProgress, LinkKind, SystemIntegrityReport,
};
pub use registry::{DuplicatePolicy, FlowRegistry, RegistryConfig};

/// The business logic invoked to execute one step.
///
/// Handlers receive one payload mapping and return one result mapping.
/// They may fail; the dispatcher converts failures into structured
/// error envelopes, so a handler error never reaches the caller raw.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Execute the step against the given payload
    async fn handle(&self, payload: DataPacket) -> Result<DataPacket, CoreError>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(DataPacket) -> Fut + Send + Sync,
    Fut: Future<Output = Result<DataPacket, CoreError>> + Send,
{
    async fn handle(&self, payload: DataPacket) -> Result<DataPacket, CoreError> {
        (self.f)(payload).await
    }
}

/// Wrap an async closure as a step handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(DataPacket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DataPacket, CoreError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_handler_fn_invokes_closure() {
        let handler = handler_fn(|payload: DataPacket| async move {
            let name = payload.as_value()["name"].as_str().unwrap_or("unknown").to_string();
            Ok(DataPacket::singleton("greeting", json!(format!("hello {}", name))))
        });

        let result = handler
            .handle(DataPacket::new(json!({"name": "ada"})))
            .await
            .unwrap();

        assert_eq!(result.as_value()["greeting"], "hello ada");
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_errors() {
        let handler = handler_fn(|_payload| async {
            Err(CoreError::StepExecutionError("nope".to_string()))
        });

        let result = handler.handle(DataPacket::null()).await;
        assert!(matches!(result, Err(CoreError::StepExecutionError(_))));
    }
}
