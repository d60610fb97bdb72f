//! In-memory index of all registered flow and step definitions.
//!
//! The registry is an explicit object constructed at process start and
//! injected into the dispatcher and into every module's registration
//! call; there is no global singleton. Registration is treated as a
//! start-up phase with effectively one writer; the sharded maps keep
//! concurrent registration safe without a global lock.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::definition::{FlowDefinition, FlowId, StepDefinition, StepId};

/// Integrity reports and progress computation
pub mod integrity;

/// What to do when a flow or step id is registered twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Replace the previous definition and log a warning
    Overwrite,

    /// Keep the previous definition and refuse the new one
    Reject,
}

/// Configuration for the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Duplicate registration policy
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Overwrite,
        }
    }
}

/// The in-memory index of all known flow and step definitions
pub struct FlowRegistry {
    flows: DashMap<String, FlowDefinition>,
    steps: DashMap<String, StepDefinition>,

    // Derived reverse index, maintained on flow registration
    step_to_flow: DashMap<String, String>,

    config: RegistryConfig,
}

impl FlowRegistry {
    /// Create a registry with the default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with an explicit configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            flows: DashMap::new(),
            steps: DashMap::new(),
            step_to_flow: DashMap::new(),
            config,
        }
    }

    /// Register a flow definition.
    ///
    /// Malformed definitions are skipped with a warning and `false`;
    /// registration never panics and never returns an error to the
    /// caller. Duplicate ids follow the configured [`DuplicatePolicy`].
    pub fn register_flow(&self, definition: FlowDefinition) -> bool {
        if let Err(e) = definition.validate() {
            warn!(
                flow_id = %definition.flow_id.0,
                error = %e,
                "Skipping malformed flow definition"
            );
            return false;
        }

        if let Some(existing) = self.flows.get(&definition.flow_id.0).map(|f| f.clone()) {
            match self.config.duplicate_policy {
                DuplicatePolicy::Reject => {
                    warn!(
                        flow_id = %definition.flow_id.0,
                        "Duplicate flow registration rejected; keeping the existing definition"
                    );
                    return false;
                }
                DuplicatePolicy::Overwrite => {
                    warn!(
                        flow_id = %definition.flow_id.0,
                        "Overwriting previously registered flow definition"
                    );
                    // Drop reverse-index entries the new definition no longer owns
                    for step_id in &existing.steps {
                        self.step_to_flow
                            .remove_if(&step_id.0, |_, owner| owner == &existing.flow_id.0);
                    }
                }
            }
        }

        for step_id in &definition.steps {
            self.step_to_flow
                .insert(step_id.0.clone(), definition.flow_id.0.clone());
        }

        info!(
            flow_id = %definition.flow_id.0,
            steps = definition.steps.len(),
            "Flow registered"
        );
        self.flows.insert(definition.flow_id.0.clone(), definition);
        true
    }

    /// Register a step definition.
    ///
    /// Same contract as [`register_flow`](Self::register_flow).
    pub fn register_step(&self, definition: StepDefinition) -> bool {
        if let Err(e) = definition.validate() {
            warn!(error = %e, "Skipping malformed step definition");
            return false;
        }

        if self.steps.contains_key(&definition.step_id.0) {
            match self.config.duplicate_policy {
                DuplicatePolicy::Reject => {
                    warn!(
                        step_id = %definition.step_id.0,
                        "Duplicate step registration rejected; keeping the existing definition"
                    );
                    return false;
                }
                DuplicatePolicy::Overwrite => {
                    warn!(
                        step_id = %definition.step_id.0,
                        "Overwriting previously registered step definition"
                    );
                }
            }
        }

        self.steps.insert(definition.step_id.0.clone(), definition);
        true
    }

    /// Look up a flow definition
    pub fn get_flow(&self, flow_id: &FlowId) -> Option<FlowDefinition> {
        self.flows.get(&flow_id.0).map(|def| def.clone())
    }

    /// Look up a step definition
    pub fn get_step(&self, step_id: &StepId) -> Option<StepDefinition> {
        self.steps.get(&step_id.0).map(|def| def.clone())
    }

    /// Find the flow a step belongs to, via the reverse index
    pub fn get_flow_for_step(&self, step_id: &StepId) -> Option<FlowDefinition> {
        let flow_id = self.step_to_flow.get(&step_id.0)?.clone();
        self.get_flow(&FlowId(flow_id))
    }

    /// The step linked after the given one, or none
    pub fn get_next_step(&self, step_id: &StepId) -> Option<StepDefinition> {
        let next = self.steps.get(&step_id.0)?.next_step.clone()?;
        self.get_step(&next)
    }

    /// The step linked before the given one, or none
    pub fn get_previous_step(&self, step_id: &StepId) -> Option<StepDefinition> {
        let previous = self.steps.get(&step_id.0)?.previous_step.clone()?;
        self.get_step(&previous)
    }

    /// Number of registered flows
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Number of registered steps
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Ids of all registered flows
    pub fn flow_ids(&self) -> Vec<FlowId> {
        self.flows
            .iter()
            .map(|entry| FlowId(entry.key().clone()))
            .collect()
    }
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
