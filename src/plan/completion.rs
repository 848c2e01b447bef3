//! Completion service contract used by the plan generator.
//!
//! The generator sends a [`PlanRequest`] and expects a [`GeneratedPlan`]
//! back. Responses are checked with [`GeneratedPlan::check`] before use;
//! any error makes the generator fall back to a default plan.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use super::executor::ExecutorError;
use super::order::execution_order;
use super::plan::Plan;
use super::step::Step;
use crate::agents::AgentContext;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::task::{Priority, Task};
use crate::util::{preview, strip_code_fence};

/// Sampling temperature for new plans.
pub const CREATE_TEMPERATURE: f64 = 0.3;
/// Sampling temperature for plan adaptation.
pub const ADAPT_TEMPERATURE: f64 = 0.4;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Llm(String),

    #[error("completion response is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("completion response violates the plan schema: {0}")]
    Schema(String),
}

/// Task fields forwarded to the completion service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskMetadata {
    pub task_type: String,
    pub priority: Priority,
    pub deadline: Option<DateTime<Utc>>,
    pub constraints: Value,
    pub payload: Value,
}

impl From<&Task> for TaskMetadata {
    fn from(task: &Task) -> Self {
        Self {
            task_type: task.task_type.clone(),
            priority: task.effective_priority(),
            deadline: task.deadline,
            constraints: task
                .constraints
                .clone()
                .map(Value::Object)
                .unwrap_or_else(|| json!({})),
            payload: task.payload.clone(),
        }
    }
}

/// What the completion service is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanPurpose {
    Create,
    Adapt {
        plan_title: String,
        failed_step_id: String,
        error: String,
        /// `"<n>. <title> (<status>) - <description>"` per current step
        current_steps: Vec<String>,
    },
}

/// A structured generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRequest {
    pub purpose: PlanPurpose,
    pub task: Option<TaskMetadata>,
    pub context_summary: Value,
    /// JSON schema the response must follow
    pub response_shape: Value,
    pub temperature: f64,
}

impl PlanRequest {
    /// Request a new plan for `task`.
    pub fn create(task: &Task, context: &AgentContext) -> Self {
        Self {
            purpose: PlanPurpose::Create,
            task: Some(TaskMetadata::from(task)),
            context_summary: context.summary(),
            response_shape: response_shape(),
            temperature: CREATE_TEMPERATURE,
        }
    }

    /// Request revised steps for a plan whose step `failed_step_id` failed.
    pub fn adapt(plan: &Plan, failed_step_id: &str, error: &str) -> Self {
        let current_steps = plan
            .steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                format!(
                    "{}. {} ({}) - {}",
                    idx + 1,
                    step.title,
                    serde_json::to_value(step.status)
                        .ok()
                        .and_then(|v| v.as_str().map(String::from))
                        .unwrap_or_default(),
                    step.description
                )
            })
            .collect();

        Self {
            purpose: PlanPurpose::Adapt {
                plan_title: plan.title.clone(),
                failed_step_id: failed_step_id.to_string(),
                error: error.to_string(),
                current_steps,
            },
            task: None,
            context_summary: json!({}),
            response_shape: response_shape(),
            temperature: ADAPT_TEMPERATURE,
        }
    }

    /// Render the request as a natural-language prompt.
    pub fn render_prompt(&self) -> String {
        match &self.purpose {
            PlanPurpose::Create => {
                let task = self.task.as_ref();
                let field = |f: fn(&TaskMetadata) -> String| task.map(f).unwrap_or_default();
                format!(
                    "Create a detailed execution plan for the following task.\n\n\
                     TASK DETAILS:\n\
                     - Type: {}\n\
                     - Priority: {}\n\
                     - Deadline: {}\n\
                     - Constraints: {}\n\
                     - Payload: {}\n\n\
                     AVAILABLE CONTEXT:\n\
                     - MCP Context: {}\n\
                     - Codebase Context: {}\n\
                     - Shell Context: {}\n\n\
                     REQUIREMENTS:\n\
                     1. Break the task into logical, sequential steps\n\
                     2. Express dependencies as 0-based indices into the step list\n\
                     3. Estimate realistic durations in milliseconds\n\
                     4. List the tools each step needs\n\
                     5. Assign priorities (low, medium, high, critical)\n\
                     6. Cover likely edge cases and error scenarios",
                    field(|t| t.task_type.clone()),
                    field(|t| t.priority.to_string()),
                    field(|t| t
                        .deadline
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_else(|| "None".to_string())),
                    field(|t| t.constraints.to_string()),
                    field(|t| t.payload.to_string()),
                    self.context_summary["mcp"],
                    self.context_summary["codebase"],
                    self.context_summary["shell"],
                )
            }
            PlanPurpose::Adapt {
                plan_title,
                failed_step_id,
                error,
                current_steps,
            } => format!(
                "The following plan execution failed:\n\n\
                 PLAN: {}\n\
                 FAILED STEP: {}\n\
                 ERROR: {}\n\n\
                 CURRENT PLAN STEPS:\n{}\n\n\
                 Suggest modifications to handle this failure. You can:\n\
                 1. Retry the failed step with a different approach\n\
                 2. Add recovery steps\n\
                 3. Skip the failed step if non-critical\n\
                 4. Modify subsequent steps\n\n\
                 Respond with the updated plan structure.",
                plan_title,
                failed_step_id,
                error,
                current_steps.join("\n")
            ),
        }
    }
}

/// JSON schema of a [`GeneratedPlan`].
pub fn response_shape() -> Value {
    json!({
        "type": "object",
        "required": ["title", "description", "steps"],
        "properties": {
            "title": {"type": "string", "description": "Brief title for the plan"},
            "description": {"type": "string", "description": "What this plan accomplishes"},
            "steps": {
                "type": "array",
                "description": "Plan steps in logical order",
                "items": {
                    "type": "object",
                    "required": ["title", "description", "priority", "dependencies"],
                    "properties": {
                        "title": {"type": "string"},
                        "description": {"type": "string"},
                        "priority": {
                            "type": "string",
                            "enum": ["low", "medium", "high", "critical"]
                        },
                        "estimated_duration_ms": {"type": "integer", "minimum": 0},
                        "tools": {"type": "array", "items": {"type": "string"}},
                        "dependencies": {
                            "type": "array",
                            "description": "0-based indices of steps that must complete first",
                            "items": {"type": "integer", "minimum": 0}
                        }
                    }
                }
            }
        }
    })
}

/// A plan as returned by the completion service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPlan {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<GeneratedStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedStep {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, alias = "estimatedDuration")]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    /// Indices into `steps`
    #[serde(default)]
    pub dependencies: Vec<usize>,
}

impl GeneratedPlan {
    /// Reject responses the generator cannot turn into a consistent plan.
    pub fn check(&self) -> Result<(), CompletionError> {
        if self.steps.is_empty() {
            return Err(CompletionError::Schema("plan has no steps".to_string()));
        }
        for (idx, step) in self.steps.iter().enumerate() {
            if step.title.trim().is_empty() {
                return Err(CompletionError::Schema(format!("step {} has no title", idx)));
            }
            for &dep in &step.dependencies {
                if dep >= self.steps.len() {
                    return Err(CompletionError::Schema(format!(
                        "step {} depends on out-of-range index {}",
                        idx, dep
                    )));
                }
                if dep == idx {
                    return Err(CompletionError::Schema(format!(
                        "step {} depends on itself",
                        idx
                    )));
                }
            }
        }

        let indexed: Vec<Step> = self
            .steps
            .iter()
            .enumerate()
            .map(|(idx, g)| {
                Step::new(idx.to_string(), g.title.as_str(), "")
                    .with_dependencies(g.dependencies.iter().map(|dep| dep.to_string()))
            })
            .collect();
        if let Err(ExecutorError::CircularDependency { step_id }) = execution_order(&indexed) {
            return Err(CompletionError::Schema(format!(
                "step {} is part of a dependency cycle",
                step_id
            )));
        }
        Ok(())
    }
}

/// Produces structured plans on request.
#[async_trait]
pub trait PlanCompletion: Send + Sync {
    async fn complete(&self, request: &PlanRequest) -> Result<GeneratedPlan, CompletionError>;
}

/// Completion service backed by a chat model.
pub struct LlmPlanCompletion {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LlmPlanCompletion {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }
}

/// Parse a model reply into a plan, tolerating a surrounding code fence.
pub fn parse_generated_plan(content: &str) -> Result<GeneratedPlan, CompletionError> {
    Ok(serde_json::from_str(strip_code_fence(content))?)
}

#[async_trait]
impl PlanCompletion for LlmPlanCompletion {
    async fn complete(&self, request: &PlanRequest) -> Result<GeneratedPlan, CompletionError> {
        let system = format!(
            "You are an AI planning assistant. Reply with a single JSON object \
             matching this schema and nothing else:\n{}",
            request.response_shape
        );
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(request.render_prompt()),
        ];
        let options = ChatOptions {
            temperature: Some(request.temperature),
            ..ChatOptions::default()
        };

        let response = self
            .llm
            .chat_completion_with_options(&self.model, &messages, options)
            .await
            .map_err(|e| CompletionError::Llm(format!("{:#}", e)))?;

        let content = response
            .content
            .ok_or_else(|| CompletionError::Llm("empty response".to_string()))?;
        tracing::debug!("Planner reply: {}", preview(&content, 200));

        parse_generated_plan(&content)
    }
}
