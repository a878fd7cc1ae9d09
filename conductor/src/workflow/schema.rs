//! JSON schema types for workflow definitions
//!
//! Each workflow is a file named `<WORKFLOW_ID>.json`:
//!
//! ```json
//! {
//!   "steps": [
//!     "injection_check_agent",
//!     { "sub_workflow": "QUERY_WORKFLOW" },
//!     {
//!       "loop": {
//!         "condition_key": "result_count",
//!         "condition_value": 0,
//!         "steps": ["query_writer_agent", "query_executor_agent"],
//!         "max_iterations": 3,
//!         "fallback_agent": "query_rewriter_agent",
//!         "fallback_message": "Previous query returned no results."
//!       }
//!     },
//!     "response_generator_agent"
//!   ]
//! }
//! ```
//!
//! A bare string is an agent id; `sub_workflow` inlines another
//! workflow's steps at that position; `loop` repeats its body until a
//! metadata condition is met or the iteration cap is hit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fallback message used when a loop directive does not supply one
pub const DEFAULT_FALLBACK_MESSAGE: &str = "Previous step returned no results.";

fn default_max_iterations() -> u32 {
    3
}

/// A complete workflow definition, immutable once loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Parse a definition from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// A single step in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    /// Run a single named agent
    Agent(String),
    /// Inline-expand another workflow's steps at this position
    SubWorkflow(SubWorkflowStep),
    /// Repeat an inner step sequence while a metadata condition holds
    Loop(LoopStep),
}

impl Step {
    pub fn agent(agent_id: impl Into<String>) -> Self {
        Step::Agent(agent_id.into())
    }

    pub fn sub_workflow(workflow_id: impl Into<String>) -> Self {
        Step::SubWorkflow(SubWorkflowStep {
            sub_workflow: workflow_id.into(),
        })
    }

    pub fn looped(directive: LoopDirective) -> Self {
        Step::Loop(LoopStep { directive })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubWorkflowStep {
    pub sub_workflow: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopStep {
    #[serde(rename = "loop")]
    pub directive: LoopDirective,
}

/// A bounded retry construct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDirective {
    /// Metadata key the exit condition reads
    pub condition_key: String,

    /// With a value: the loop continues while
    /// `metadata[condition_key]` equals it (the value names the
    /// not-yet-satisfied state). Without one: the loop continues
    /// while the key is falsy or absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_value: Option<Value>,

    /// Inner step sequence, run once per iteration
    pub steps: Vec<Step>,

    /// Iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Agent run exactly once if the cap is hit without the exit
    /// condition being satisfied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_agent: Option<String>,

    /// Content handed to the fallback agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_message: Option<String>,
}

impl LoopDirective {
    pub fn fallback_message(&self) -> &str {
        self.fallback_message
            .as_deref()
            .unwrap_or(DEFAULT_FALLBACK_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_agent_and_sub_workflow_steps() {
        let def = WorkflowDefinition::from_json(
            r#"{"steps": ["safety_agent", {"sub_workflow": "INNER"}, "responder"]}"#,
        )
        .unwrap();

        assert_eq!(def.steps.len(), 3);
        assert!(matches!(&def.steps[0], Step::Agent(id) if id == "safety_agent"));
        assert!(
            matches!(&def.steps[1], Step::SubWorkflow(s) if s.sub_workflow == "INNER")
        );
    }

    #[test]
    fn test_parse_loop_step_with_defaults() {
        let def = WorkflowDefinition::from_json(
            r#"{"steps": [{"loop": {"condition_key": "result_count", "steps": ["executor"]}}]}"#,
        )
        .unwrap();

        let Step::Loop(loop_step) = &def.steps[0] else {
            panic!("expected loop step");
        };
        let d = &loop_step.directive;
        assert_eq!(d.condition_key, "result_count");
        assert!(d.condition_value.is_none());
        assert_eq!(d.max_iterations, 3);
        assert!(d.fallback_agent.is_none());
        assert_eq!(d.fallback_message(), DEFAULT_FALLBACK_MESSAGE);
    }

    #[test]
    fn test_parse_full_loop_step() {
        let def = WorkflowDefinition::from_json(
            r#"{
                "steps": [{
                    "loop": {
                        "condition_key": "result_count",
                        "condition_value": 0,
                        "steps": ["writer", "executor"],
                        "max_iterations": 5,
                        "fallback_agent": "rewriter",
                        "fallback_message": "No results, rewrite the query."
                    }
                }]
            }"#,
        )
        .unwrap();

        let Step::Loop(loop_step) = &def.steps[0] else {
            panic!("expected loop step");
        };
        let d = &loop_step.directive;
        assert_eq!(d.condition_value, Some(json!(0)));
        assert_eq!(d.steps.len(), 2);
        assert_eq!(d.max_iterations, 5);
        assert_eq!(d.fallback_agent.as_deref(), Some("rewriter"));
        assert_eq!(d.fallback_message(), "No results, rewrite the query.");
    }

    #[test]
    fn test_nested_loop_parses() {
        let def = WorkflowDefinition::from_json(
            r#"{
                "steps": [{
                    "loop": {
                        "condition_key": "outer",
                        "steps": [{"loop": {"condition_key": "inner", "steps": ["a"]}}]
                    }
                }]
            }"#,
        )
        .unwrap();

        let Step::Loop(outer) = &def.steps[0] else {
            panic!("expected loop step");
        };
        assert!(matches!(&outer.directive.steps[0], Step::Loop(_)));
    }

    #[test]
    fn test_step_round_trip() {
        let step = Step::looped(LoopDirective {
            condition_key: "n".to_string(),
            condition_value: Some(json!(0)),
            steps: vec![Step::agent("b")],
            max_iterations: 2,
            fallback_agent: Some("c".to_string()),
            fallback_message: Some("retry".to_string()),
        });

        let json = serde_json::to_string(&step).unwrap();
        assert!(json.starts_with(r#"{"loop":"#));

        let back: Step = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Step::Loop(_)));
    }
}
