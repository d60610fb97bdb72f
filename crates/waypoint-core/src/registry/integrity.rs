//! Integrity validation and progress computation over registered flows.
//!
//! Validation never fails the caller: structural problems are collected
//! into serializable reports so health checks can run against a broken
//! registry without crashing the process.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::domain::definition::{FlowId, StepId};
use crate::registry::FlowRegistry;
use crate::CoreError;

/// Which link on a step is broken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// The step's `next_step` link
    Next,

    /// The step's `previous_step` link
    Previous,
}

/// A step link pointing outside the flow's declared membership
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokenLink {
    /// The step carrying the link
    pub from: StepId,

    /// Which link is broken
    pub kind: LinkKind,

    /// Where the link points
    pub to: StepId,
}

/// Result of validating one flow's declared structure
#[derive(Debug, Clone, Serialize)]
pub struct FlowIntegrityReport {
    /// The flow that was validated
    pub flow_id: FlowId,

    /// True when no errors were found (warnings do not count)
    pub valid: bool,

    /// Steps the flow declares
    pub total_steps: usize,

    /// Declared steps that resolved to a registered definition
    pub registered_steps: usize,

    /// Declared steps with no registered definition
    pub missing_steps: Vec<StepId>,

    /// Registered steps with no attached handler
    pub invalid_handlers: Vec<StepId>,

    /// Links pointing outside the flow
    pub broken_links: Vec<BrokenLink>,

    /// Registered steps not reachable from the entry step
    pub unreachable_steps: Vec<StepId>,

    /// Error descriptions, one per structural problem
    pub errors: Vec<String>,

    /// Warning descriptions
    pub warnings: Vec<String>,

    /// Percentage of declared steps actually registered, 2 decimals
    pub completion_rate: f64,

    /// Remediation suggestions
    pub suggestions: Vec<String>,
}

impl FlowIntegrityReport {
    fn unknown_flow(flow_id: &FlowId) -> Self {
        Self {
            flow_id: flow_id.clone(),
            valid: false,
            total_steps: 0,
            registered_steps: 0,
            missing_steps: Vec::new(),
            invalid_handlers: Vec::new(),
            broken_links: Vec::new(),
            unreachable_steps: Vec::new(),
            errors: vec![format!("Flow {} is not registered", flow_id.0)],
            warnings: Vec::new(),
            completion_rate: 0.0,
            suggestions: vec![format!(
                "Register flow '{}' before validating it",
                flow_id.0
            )],
        }
    }
}

/// Aggregated validation over every registered flow
#[derive(Debug, Clone, Serialize)]
pub struct SystemIntegrityReport {
    /// Number of registered flows
    pub total_flows: usize,

    /// Flows that validated clean
    pub valid_flows: usize,

    /// Registered declared steps over all declared steps, 2 decimals
    pub completion_rate: f64,

    /// One line per flow error, prefixed with the flow id
    pub critical_issues: Vec<String>,

    /// Per-flow reports keyed by flow id
    pub flows: HashMap<String, FlowIntegrityReport>,

    /// True when every flow validated clean
    pub healthy: bool,

    /// One-line summary
    pub summary: String,
}

/// Position of a step within a flow's ordered step list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowProgress {
    /// The flow being traversed
    pub flow_id: FlowId,

    /// The step the progress is computed for
    pub current_step: StepId,

    /// Percentage through the flow, 2 decimals
    pub progress: f64,

    /// Steps completed before the current one
    pub completed_steps: usize,

    /// Steps remaining after the current one
    pub remaining_steps: usize,

    /// Whether the current step is the first
    pub is_first_step: bool,

    /// Whether the current step is the last
    pub is_last_step: bool,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl FlowRegistry {
    /// Validate one flow's declared structure against the registry.
    ///
    /// Runs six stages: structural membership of entry/exit steps,
    /// completeness of declared steps, handler validity, module
    /// tagging, link consistency, and reachability from the entry
    /// step. Never returns an error; an unknown flow yields an
    /// invalid report.
    pub fn validate_flow_integrity(&self, flow_id: &FlowId) -> FlowIntegrityReport {
        let Some(flow) = self.get_flow(flow_id) else {
            return FlowIntegrityReport::unknown_flow(flow_id);
        };

        let declared: HashSet<&StepId> = flow.steps.iter().collect();
        let total_steps = flow.steps.len();

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();
        let mut missing_steps = Vec::new();
        let mut invalid_handlers = Vec::new();
        let mut broken_links = Vec::new();
        let mut registered_steps = 0usize;

        // Stage 1: entry and exit steps must be declared members
        if !declared.contains(&flow.entry_step) {
            errors.push(format!(
                "Entry step {} is not declared in flow steps",
                flow.entry_step.0
            ));
        }
        for exit in &flow.exit_steps {
            if !declared.contains(exit) {
                errors.push(format!(
                    "Exit step {} is not declared in flow steps",
                    exit.0
                ));
            }
        }

        // Stages 2-5 walk the declared steps once
        for step_id in &flow.steps {
            let Some(step) = self.get_step(step_id) else {
                missing_steps.push(step_id.clone());
                errors.push(format!("Step {} is declared but not registered", step_id.0));
                suggestions.push(format!(
                    "Register step '{}' before serving flow '{}'",
                    step_id.0, flow.flow_id.0
                ));
                continue;
            };
            registered_steps += 1;

            if step.handler.is_none() {
                invalid_handlers.push(step_id.clone());
                errors.push(format!("Step {} has no invocable handler", step_id.0));
                suggestions.push(format!("Attach a handler to step '{}'", step_id.0));
            }

            if step.module.0.is_empty() {
                warnings.push(format!("Step {} has no owning module", step_id.0));
            }

            if let Some(next) = &step.next_step {
                if !declared.contains(next) {
                    broken_links.push(BrokenLink {
                        from: step_id.clone(),
                        kind: LinkKind::Next,
                        to: next.clone(),
                    });
                    errors.push(format!(
                        "Step {} links next to {}, which is outside the flow",
                        step_id.0, next.0
                    ));
                }
            }
            if let Some(previous) = &step.previous_step {
                if !declared.contains(previous) {
                    broken_links.push(BrokenLink {
                        from: step_id.clone(),
                        kind: LinkKind::Previous,
                        to: previous.clone(),
                    });
                    errors.push(format!(
                        "Step {} links previous to {}, which is outside the flow",
                        step_id.0, previous.0
                    ));
                }
            }
        }

        // Stage 6: breadth-first walk from the entry step along next links
        let mut reached: HashSet<StepId> = HashSet::new();
        let mut queue: VecDeque<StepId> = VecDeque::new();
        queue.push_back(flow.entry_step.clone());
        while let Some(current) = queue.pop_front() {
            if !declared.contains(&current) || reached.contains(&current) {
                continue;
            }
            let Some(step) = self.get_step(&current) else {
                continue;
            };
            reached.insert(current);
            if let Some(next) = step.next_step {
                queue.push_back(next);
            }
        }

        let missing: HashSet<&StepId> = missing_steps.iter().collect();
        let unreachable_steps: Vec<StepId> = flow
            .steps
            .iter()
            .filter(|s| !reached.contains(*s) && !missing.contains(*s))
            .cloned()
            .collect();
        for step_id in &unreachable_steps {
            warnings.push(format!(
                "Step {} is not reachable from the entry step",
                step_id.0
            ));
            suggestions.push(format!(
                "Link step '{}' into the chain starting at '{}'",
                step_id.0, flow.entry_step.0
            ));
        }

        let completion_rate = if total_steps == 0 {
            100.0
        } else {
            round2(registered_steps as f64 / total_steps as f64 * 100.0)
        };

        let report = FlowIntegrityReport {
            flow_id: flow.flow_id.clone(),
            valid: errors.is_empty(),
            total_steps,
            registered_steps,
            missing_steps,
            invalid_handlers,
            broken_links,
            unreachable_steps,
            errors,
            warnings,
            completion_rate,
            suggestions,
        };

        debug!(
            flow_id = %flow.flow_id.0,
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Flow integrity validated"
        );
        report
    }

    /// Validate every registered flow and aggregate the results.
    ///
    /// Never fails; an empty registry yields a healthy "no flows" report.
    pub fn validate_all_flows_integrity(&self) -> SystemIntegrityReport {
        let flow_ids = self.flow_ids();

        if flow_ids.is_empty() {
            return SystemIntegrityReport {
                total_flows: 0,
                valid_flows: 0,
                completion_rate: 100.0,
                critical_issues: Vec::new(),
                flows: HashMap::new(),
                healthy: true,
                summary: "no flows registered".to_string(),
            };
        }

        let mut flows = HashMap::new();
        let mut critical_issues = Vec::new();
        let mut valid_flows = 0usize;
        let mut declared_total = 0usize;
        let mut registered_total = 0usize;

        for flow_id in flow_ids {
            let report = self.validate_flow_integrity(&flow_id);
            if report.valid {
                valid_flows += 1;
            }
            declared_total += report.total_steps;
            registered_total += report.registered_steps;
            for error in &report.errors {
                critical_issues.push(format!("{}: {}", flow_id.0, error));
            }
            flows.insert(flow_id.0, report);
        }

        let total_flows = flows.len();
        let completion_rate = if declared_total == 0 {
            100.0
        } else {
            round2(registered_total as f64 / declared_total as f64 * 100.0)
        };

        SystemIntegrityReport {
            total_flows,
            valid_flows,
            completion_rate,
            critical_issues,
            flows,
            healthy: valid_flows == total_flows,
            summary: format!("{}/{} flows valid", valid_flows, total_flows),
        }
    }

    /// Locate a step within a flow's ordered step list and compute how
    /// far through the flow it is.
    ///
    /// Returns a structured error when the flow is unknown or the step
    /// is not part of it.
    pub fn get_flow_progress(
        &self,
        flow_id: &FlowId,
        current_step_id: &StepId,
    ) -> Result<FlowProgress, CoreError> {
        let flow = self
            .get_flow(flow_id)
            .ok_or_else(|| CoreError::FlowNotFound(flow_id.0.clone()))?;

        let n = flow.steps.len();
        let i = flow
            .steps
            .iter()
            .position(|s| s == current_step_id)
            .ok_or_else(|| {
                CoreError::ValidationError(format!(
                    "Step {} is not part of flow {}",
                    current_step_id.0, flow_id.0
                ))
            })?;

        Ok(FlowProgress {
            flow_id: flow.flow_id.clone(),
            current_step: current_step_id.clone(),
            progress: round2((i + 1) as f64 / n as f64 * 100.0),
            completed_steps: i,
            remaining_steps: n - 1 - i,
            is_first_step: i == 0,
            is_last_step: i == n - 1,
        })
    }
}
