//! Workflow resolution: sub-workflow expansion and validation
//!
//! Turns a workflow id into the fully flattened, executable step
//! list. Sub-workflow references are inlined recursively; loop steps
//! keep their nested structure but their bodies are flattened the
//! same way. Expansion is the one place unbounded recursion has to
//! be defended against: a reference cycle fails with
//! [`Error::CyclicReference`] instead of recursing forever.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::workflow::schema::{LoopDirective, LoopStep, Step, WorkflowDefinition};

/// One immutable snapshot of the loaded workflow set
pub type WorkflowSet = HashMap<String, Arc<WorkflowDefinition>>;

/// Flatten a workflow into its executable step list.
///
/// Pure function of the snapshot; the registry caches results per
/// workflow id and invalidates the cache on reload.
pub fn flatten(workflows: &WorkflowSet, workflow_id: &str) -> Result<Vec<Step>, Error> {
    let mut visiting = Vec::new();
    flatten_workflow(workflows, workflow_id, &mut visiting)
}

fn flatten_workflow(
    workflows: &WorkflowSet,
    workflow_id: &str,
    visiting: &mut Vec<String>,
) -> Result<Vec<Step>, Error> {
    if visiting.iter().any(|id| id == workflow_id) {
        let mut chain = visiting.clone();
        chain.push(workflow_id.to_string());
        return Err(Error::CyclicReference(chain.join(" -> ")));
    }

    let definition = workflows
        .get(workflow_id)
        .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))?;

    visiting.push(workflow_id.to_string());
    let flat = flatten_steps(workflows, workflow_id, &definition.steps, visiting);
    visiting.pop();
    flat
}

fn flatten_steps(
    workflows: &WorkflowSet,
    workflow_id: &str,
    steps: &[Step],
    visiting: &mut Vec<String>,
) -> Result<Vec<Step>, Error> {
    let mut flat = Vec::new();

    for step in steps {
        match step {
            Step::Agent(agent_id) => flat.push(Step::Agent(agent_id.clone())),
            Step::SubWorkflow(sub) => {
                flat.extend(flatten_workflow(workflows, &sub.sub_workflow, visiting)?);
            }
            Step::Loop(loop_step) => {
                let directive = &loop_step.directive;
                let body = flatten_steps(workflows, workflow_id, &directive.steps, visiting)?;

                // A loop body must not contain another loop on the
                // same condition key; sub-workflow expansion could
                // otherwise smuggle one in and keep the condition
                // unsatisfiable forever.
                if body_contains_condition_key(&body, &directive.condition_key) {
                    return Err(Error::InvalidDefinition {
                        workflow_id: workflow_id.to_string(),
                        reason: format!(
                            "loop body contains a nested loop on the same condition key '{}'",
                            directive.condition_key
                        ),
                    });
                }

                flat.push(Step::Loop(LoopStep {
                    directive: LoopDirective {
                        steps: body,
                        ..directive.clone()
                    },
                }));
            }
        }
    }

    Ok(flat)
}

fn body_contains_condition_key(steps: &[Step], condition_key: &str) -> bool {
    steps.iter().any(|step| match step {
        Step::Loop(inner) => {
            inner.directive.condition_key == condition_key
                || body_contains_condition_key(&inner.directive.steps, condition_key)
        }
        _ => false,
    })
}

/// Count the agent steps in a flattened list, including loop bodies.
/// Used by validation reporting and tests.
pub fn agent_step_count(steps: &[Step]) -> usize {
    steps
        .iter()
        .map(|step| match step {
            Step::Agent(_) => 1,
            Step::Loop(l) => agent_step_count(&l.directive.steps),
            Step::SubWorkflow(_) => 0,
        })
        .sum()
}
