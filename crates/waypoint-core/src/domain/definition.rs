use crate::{CoreError, StepHandler};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Value object: Flow ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

/// Value object: Step ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

/// Value object: User ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Value object: name of the module that owns a flow or step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleName(pub String);

/// Shape of a flow's step graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    /// Steps form a single chain from entry to exit
    Linear,

    /// Steps may fork; more than one path leads to an exit
    Branching,
}

/// Represents a single unit of work within a flow, bound to a handler
/// and linked to its neighbours in the step chain.
#[derive(Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// ID of the step, unique within the registry
    pub step_id: StepId,

    /// Module that owns this step
    pub module: ModuleName,

    /// Description of what the step does
    pub description: String,

    /// Handler invoked when the step is dispatched.
    /// Not serializable; registration must attach it.
    #[serde(skip)]
    pub handler: Option<Arc<dyn StepHandler>>,

    /// The step that follows this one within the same flow
    pub next_step: Option<StepId>,

    /// The step that precedes this one within the same flow
    pub previous_step: Option<StepId>,

    /// Fields the handler expects in its payload (declared contract,
    /// not enforced by the core)
    pub required_fields: Vec<String>,

    /// Fields the handler promises in its result
    pub output_fields: Vec<String>,

    /// Declared preconditions
    pub preconditions: Vec<String>,

    /// Declared postconditions
    pub postconditions: Vec<String>,
}

// Manual Debug because the handler is an opaque trait object.
impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("step_id", &self.step_id)
            .field("module", &self.module)
            .field("next_step", &self.next_step)
            .field("previous_step", &self.previous_step)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl StepDefinition {
    /// Create a new step definition bound to a handler
    pub fn new(
        step_id: impl Into<String>,
        module: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) -> Self {
        Self {
            step_id: StepId(step_id.into()),
            module: ModuleName(module.into()),
            description: String::new(),
            handler: Some(handler),
            next_step: None,
            previous_step: None,
            required_fields: Vec::new(),
            output_fields: Vec::new(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Link this step to its neighbours in the flow chain
    pub fn with_links(mut self, previous: Option<&str>, next: Option<&str>) -> Self {
        self.previous_step = previous.map(|s| StepId(s.to_string()));
        self.next_step = next.map(|s| StepId(s.to_string()));
        self
    }

    /// Declare the fields the handler expects in its payload
    pub fn with_required_fields(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Declare the fields the handler promises in its result
    pub fn with_output_fields(mut self, fields: &[&str]) -> Self {
        self.output_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Validate the step definition shape
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.step_id.0.is_empty() {
            return Err(CoreError::ValidationError(
                "Step must have a non-empty id".to_string(),
            ));
        }
        Ok(())
    }
}

/// Represents a named, ordered sequence of steps describing one
/// complete multi-step interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// ID of the flow, unique within the registry
    pub flow_id: FlowId,

    /// Human-readable name of the flow
    pub name: String,

    /// Description of the flow
    pub description: Option<String>,

    /// Modules participating in this flow
    pub modules: Vec<ModuleName>,

    /// The ordered steps in this flow
    pub steps: Vec<StepId>,

    /// The step a new execution starts from
    pub entry_step: StepId,

    /// Steps that terminate the flow
    pub exit_steps: Vec<StepId>,

    /// Shape of the step graph
    pub flow_type: FlowType,

    /// Upper bound on the number of steps an execution may visit
    pub max_steps: u32,

    /// How long an execution may stay live before callers should
    /// treat it as stale
    pub timeout: Duration,
}

impl FlowDefinition {
    /// Create a new flow definition with linear defaults
    pub fn new(flow_id: impl Into<String>, name: impl Into<String>, steps: &[&str]) -> Self {
        let steps: Vec<StepId> = steps.iter().map(|s| StepId(s.to_string())).collect();
        let entry_step = steps.first().cloned().unwrap_or_else(|| StepId(String::new()));
        let max_steps = steps.len() as u32;

        Self {
            flow_id: FlowId(flow_id.into()),
            name: name.into(),
            description: None,
            modules: Vec::new(),
            steps,
            entry_step,
            exit_steps: Vec::new(),
            flow_type: FlowType::Linear,
            max_steps,
            timeout: Duration::from_secs(300),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the participating modules
    pub fn with_modules(mut self, modules: &[&str]) -> Self {
        self.modules = modules.iter().map(|m| ModuleName(m.to_string())).collect();
        self
    }

    /// Set the entry step
    pub fn with_entry_step(mut self, entry: &str) -> Self {
        self.entry_step = StepId(entry.to_string());
        self
    }

    /// Set the exit steps
    pub fn with_exit_steps(mut self, exits: &[&str]) -> Self {
        self.exit_steps = exits.iter().map(|e| StepId(e.to_string())).collect();
        self
    }

    /// Set the flow type
    pub fn with_flow_type(mut self, flow_type: FlowType) -> Self {
        self.flow_type = flow_type;
        self
    }

    /// Set the execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the flow definition shape
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.flow_id.0.is_empty() {
            return Err(CoreError::ValidationError(
                "Flow must have a non-empty id".to_string(),
            ));
        }

        // Check for empty steps
        if self.steps.is_empty() {
            return Err(CoreError::ValidationError(
                "Flow must have at least one step".to_string(),
            ));
        }

        // Check for ID uniqueness
        let mut step_ids = HashSet::new();
        for step in &self.steps {
            if !step_ids.insert(step) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate step ID: {}",
                    step.0
                )));
            }
        }

        // The entry step must be one of the declared steps
        if !step_ids.contains(&self.entry_step) {
            return Err(CoreError::ValidationError(format!(
                "Entry step {} is not declared in flow steps",
                self.entry_step.0
            )));
        }

        Ok(())
    }
}
