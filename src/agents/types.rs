//! Core types for the agent system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::AgentContext;
use crate::plan::{ExecutorError, Plan};
use crate::task::Task;

/// Lifecycle of an agent.
///
/// ```text
/// Pending -> Running -> Completed
///                   \-> Failed
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Failed)
    }
}

/// Everything recorded about one agent. The agent id is the task id.
///
/// # Invariants
/// - `duration_ms == end_time - start_time` once both are set
/// - `error` is set only when `status == Failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub status: AgentStatus,
    /// Name of the behavior chosen for the task type
    pub behavior: String,
    pub context: AgentContext,
    pub task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Output of the last completed step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl AgentSnapshot {
    /// A queued agent that has not started yet.
    pub fn pending(task: Task, behavior: impl Into<String>) -> Self {
        Self {
            id: task.id.clone(),
            status: AgentStatus::Pending,
            behavior: behavior.into(),
            context: AgentContext::empty(),
            task,
            plan: None,
            selected_model: None,
            start_time: None,
            end_time: None,
            duration_ms: None,
            error: None,
            answer: None,
        }
    }

    /// Mark the agent running with its gathered context.
    pub fn start(&mut self, context: AgentContext) {
        self.status = AgentStatus::Running;
        self.context = context;
    }

    /// Record the start of plan execution.
    pub fn mark_started(&mut self) {
        self.start_time = Some(Utc::now());
    }

    /// Record the end of the run and the resulting status.
    ///
    /// Without a recorded start the duration is zero.
    pub fn finish(&mut self, status: AgentStatus, error: Option<String>) {
        let end = Utc::now();
        let start = self.start_time.unwrap_or(end);
        self.status = status;
        self.error = error;
        self.end_time = Some(end);
        self.duration_ms = Some((end - start).num_milliseconds().max(0) as u64);
    }
}

/// Errors that end an agent's run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("Plan execution failed: {0}")]
    Execution(#[from] ExecutorError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_records_duration() {
        let task = Task::new("t1", "math", serde_json::json!({})).unwrap();
        let mut agent = AgentSnapshot::pending(task, "math");
        assert_eq!(agent.id, "t1");
        assert_eq!(agent.status, AgentStatus::Pending);

        agent.start(AgentContext::empty());
        assert_eq!(agent.status, AgentStatus::Running);
        agent.mark_started();

        agent.finish(AgentStatus::Failed, Some("boom".to_string()));
        assert!(agent.status.is_terminal());
        assert!(agent.duration_ms.is_some());
        assert!(agent.end_time >= agent.start_time);
        assert_eq!(agent.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_finish_without_start_has_zero_duration() {
        let task = Task::new("t1", "math", serde_json::json!({})).unwrap();
        let mut agent = AgentSnapshot::pending(task, "math");
        agent.finish(AgentStatus::Failed, None);
        assert_eq!(agent.duration_ms, Some(0));
    }

    #[test]
    fn test_executor_error_converts() {
        let err: AgentError = ExecutorError::CircularDependency {
            step_id: "a".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Plan execution failed: Circular dependency detected involving step a"
        );
    }
}
