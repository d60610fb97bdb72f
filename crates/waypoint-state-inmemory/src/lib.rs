//! In-memory state store implementation for the Waypoint platform
//!
//! This crate provides an in-memory implementation of the core
//! repository interface defined in the waypoint-core crate. It is
//! primarily useful for development, testing, and simple deployments
//! where persistence is not required. The archive-before-overwrite
//! contract of the state store holds here exactly as it would against
//! a durable backend.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod repositories;
pub use repositories::InMemoryUserFlowStateRepository;

#[cfg(test)]
mod tests;

use waypoint_core::domain::repository::{StateRevision, UserFlowStateRepository};
use waypoint_core::domain::user_state::UserFlowState;

type PairKey = (String, String);

/// Provider for in-memory state store repositories
pub struct InMemoryStateStoreProvider {
    // Shared storage for user flow states, keyed by (user_id, flow_id)
    states: Arc<RwLock<HashMap<PairKey, UserFlowState>>>,

    // Shared storage for archived revisions
    archive: Arc<RwLock<HashMap<PairKey, Vec<StateRevision>>>>,
}

impl InMemoryStateStoreProvider {
    /// Create a new in-memory state store provider
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            archive: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a repository handle over the shared storage.
    ///
    /// Every handle from the same provider sees the same records, so a
    /// status manager and a diagnostics caller can be wired
    /// independently.
    pub fn create_repository(&self) -> Arc<dyn UserFlowStateRepository> {
        Arc::new(InMemoryUserFlowStateRepository::new(
            self.states.clone(),
            self.archive.clone(),
        ))
    }
}

impl Default for InMemoryStateStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}
