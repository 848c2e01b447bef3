//! Core Task type submitted to the scheduler.
//!
//! # Invariants
//! - `id` and `task_type` are non-empty (enforced by `Task::new`)
//! - A task is immutable once submitted; agents only ever read it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority shared by tasks and plan steps.
///
/// # Ordering
/// `rank()` orders `Critical < High < Medium < Low`, so ascending rank
/// means "run earlier" wherever priorities break ties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Sort key: lower runs earlier.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work submitted by a caller.
///
/// The `id` doubles as the agent id; callers are responsible for keeping it
/// unique among in-flight tasks (the scheduler rejects duplicates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Caller-assigned identifier
    pub id: String,

    /// Kind of work, e.g. `code-generation` or `math`
    #[serde(rename = "type")]
    pub task_type: String,

    /// Free-form input for the agent
    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Task {
    /// Create a new task.
    ///
    /// # Errors
    /// Returns `Err` if `id` or `task_type` is empty.
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Self, TaskError> {
        let id = id.into();
        let task_type = task_type.into();
        if id.trim().is_empty() {
            return Err(TaskError::EmptyId);
        }
        if task_type.trim().is_empty() {
            return Err(TaskError::EmptyType);
        }
        Ok(Self {
            id,
            task_type,
            payload,
            priority: None,
            deadline: None,
            constraints: None,
        })
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.constraints
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    /// Check the invariants `Task::new` enforces (used for deserialized tasks).
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.id.trim().is_empty() {
            return Err(TaskError::EmptyId);
        }
        if self.task_type.trim().is_empty() {
            return Err(TaskError::EmptyType);
        }
        Ok(())
    }

    /// Textual form of the payload used by keyword heuristics and prompts.
    ///
    /// Returns the `prompt` field when the payload is an object carrying one,
    /// the string itself for string payloads, and compact JSON otherwise.
    pub fn payload_text(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => match map.get("prompt") {
                Some(serde_json::Value::String(prompt)) => prompt.clone(),
                _ => self.payload.to_string(),
            },
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Effective priority (`medium` when unset).
    pub fn effective_priority(&self) -> Priority {
        self.priority.unwrap_or_default()
    }
}

/// Errors that can occur during task construction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Task id cannot be empty")]
    EmptyId,

    #[error("Task type cannot be empty")]
    EmptyType,
}
