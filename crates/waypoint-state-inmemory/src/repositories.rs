//! Repository implementations over shared in-memory maps.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use waypoint_core::domain::definition::{FlowId, UserId};
use waypoint_core::domain::repository::{StateRevision, UserFlowStateRepository};
use waypoint_core::domain::user_state::UserFlowState;
use waypoint_core::CoreError;

type PairKey = (String, String);

/// In-memory implementation of the user flow state repository.
///
/// The write lock is held across the existence check, the archive
/// write, and the overwrite, so concurrent saves for the same key
/// cannot lose an update or skip an archived revision.
pub struct InMemoryUserFlowStateRepository {
    states: Arc<RwLock<HashMap<PairKey, UserFlowState>>>,
    archive: Arc<RwLock<HashMap<PairKey, Vec<StateRevision>>>>,
}

impl InMemoryUserFlowStateRepository {
    /// Create a repository over the given shared storage
    pub fn new(
        states: Arc<RwLock<HashMap<PairKey, UserFlowState>>>,
        archive: Arc<RwLock<HashMap<PairKey, Vec<StateRevision>>>>,
    ) -> Self {
        Self { states, archive }
    }
}

#[async_trait]
impl UserFlowStateRepository for InMemoryUserFlowStateRepository {
    async fn find(
        &self,
        user_id: &UserId,
        flow_id: &FlowId,
    ) -> Result<Option<UserFlowState>, CoreError> {
        let key = (user_id.0.clone(), flow_id.0.clone());
        let states = self.states.read().await;
        Ok(states.get(&key).cloned())
    }

    async fn find_all_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<UserFlowState>, CoreError> {
        let states = self.states.read().await;
        Ok(states
            .iter()
            .filter(|(key, _)| key.0 == user_id.0)
            .map(|(_, state)| state.clone())
            .collect())
    }

    async fn save(&self, state: &UserFlowState) -> Result<(), CoreError> {
        let key = (state.user_id.0.clone(), state.flow_id.0.clone());

        let mut stored = state.clone();
        stored.updated_at = Utc::now();

        // Lock order: states before archive, always.
        let mut states = self.states.write().await;
        if let Some(prior) = states.get(&key) {
            let revision = StateRevision {
                archived_at: stored.updated_at,
                state: prior.clone(),
            };
            let mut archive = self.archive.write().await;
            archive.entry(key.clone()).or_default().push(revision);
            debug!(
                user_id = %state.user_id.0,
                flow_id = %state.flow_id.0,
                "Archived prior state revision before overwrite"
            );
        }
        states.insert(key, stored);

        Ok(())
    }

    async fn archived_revisions(
        &self,
        user_id: &UserId,
        flow_id: &FlowId,
    ) -> Result<Vec<StateRevision>, CoreError> {
        let key = (user_id.0.clone(), flow_id.0.clone());
        let archive = self.archive.read().await;
        Ok(archive.get(&key).cloned().unwrap_or_default())
    }
}
