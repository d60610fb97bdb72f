//! Repository traits for the Waypoint core
//!
//! This module defines the durable state-store contract used by the
//! status manager. External crates implement the trait to provide
//! different persistence mechanisms; the archive-before-overwrite
//! behavior of `save` is a hard contract, not an optimization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::{FlowId, UserId};
use super::user_state::UserFlowState;
use crate::CoreError;

/// A single archived revision of a user flow state, captured just
/// before an overwriting save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRevision {
    /// When the revision was archived
    pub archived_at: DateTime<Utc>,

    /// The record's field values at that moment
    pub state: UserFlowState,
}

/// Repository for user flow states
#[async_trait]
pub trait UserFlowStateRepository: Send + Sync {
    /// Find the state for a `(user, flow)` pair
    async fn find(
        &self,
        user_id: &UserId,
        flow_id: &FlowId,
    ) -> Result<Option<UserFlowState>, CoreError>;

    /// Find all states belonging to a user
    async fn find_all_for_user(&self, user_id: &UserId)
        -> Result<Vec<UserFlowState>, CoreError>;

    /// Upsert a state record.
    ///
    /// When a record already exists for the pair, its current field
    /// values are archived before being overwritten. The existence
    /// check and the write are atomic with respect to concurrent
    /// callers for the same key, and `updated_at` is advanced on
    /// every save.
    async fn save(&self, state: &UserFlowState) -> Result<(), CoreError>;

    /// Archived revisions for a `(user, flow)` pair, oldest first
    async fn archived_revisions(
        &self,
        user_id: &UserId,
        flow_id: &FlowId,
    ) -> Result<Vec<StateRevision>, CoreError>;
}

/// Memory implementation for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;

    type PairKey = (String, String);

    /// In-memory implementation of the user flow state repository.
    ///
    /// Uses a concurrent map so the existence check and the write in
    /// `save` happen under a single entry lock.
    pub struct MemoryUserFlowStateRepository {
        states: DashMap<PairKey, UserFlowState>,
        archive: DashMap<PairKey, Vec<StateRevision>>,
    }

    impl MemoryUserFlowStateRepository {
        /// Create a new memory repository
        pub fn new() -> Self {
            Self {
                states: DashMap::new(),
                archive: DashMap::new(),
            }
        }
    }

    impl Default for MemoryUserFlowStateRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl UserFlowStateRepository for MemoryUserFlowStateRepository {
        async fn find(
            &self,
            user_id: &UserId,
            flow_id: &FlowId,
        ) -> Result<Option<UserFlowState>, CoreError> {
            let key = (user_id.0.clone(), flow_id.0.clone());
            Ok(self.states.get(&key).map(|state| state.clone()))
        }

        async fn find_all_for_user(
            &self,
            user_id: &UserId,
        ) -> Result<Vec<UserFlowState>, CoreError> {
            let result = self
                .states
                .iter()
                .filter(|entry| entry.key().0 == user_id.0)
                .map(|entry| entry.value().clone())
                .collect();

            Ok(result)
        }

        async fn save(&self, state: &UserFlowState) -> Result<(), CoreError> {
            let key = (state.user_id.0.clone(), state.flow_id.0.clone());

            let mut stored = state.clone();
            stored.updated_at = Utc::now();

            // The entry lock makes archive-then-overwrite atomic per key.
            match self.states.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    let revision = StateRevision {
                        archived_at: stored.updated_at,
                        state: occupied.get().clone(),
                    };
                    self.archive.entry(key).or_insert_with(Vec::new).push(revision);
                    occupied.insert(stored);
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(stored);
                }
            }

            Ok(())
        }

        async fn archived_revisions(
            &self,
            user_id: &UserId,
            flow_id: &FlowId,
        ) -> Result<Vec<StateRevision>, CoreError> {
            let key = (user_id.0.clone(), flow_id.0.clone());
            Ok(self
                .archive
                .get(&key)
                .map(|revisions| revisions.clone())
                .unwrap_or_default())
        }
    }

}
