//! Plan steps and their lifecycle.
//!
//! # State Machine
//! ```text
//! Pending -> InProgress -> Completed
//!                      \-> Failed
//!                      \-> Skipped
//! Failed/Skipped -> Pending   (only via `reset`, used when resuming a plan)
//! ```
//!
//! Only steps skipped for [`DEPENDENCIES_NOT_COMPLETED`] can be reset from
//! `Skipped`; a step skipped for any other reason stays skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::Priority;

/// Retry budget used when a step does not specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Error recorded on a step whose prerequisites did not finish.
pub const DEPENDENCIES_NOT_COMPLETED: &str = "Dependencies not completed";

/// Status of a single step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Terminal states end a step's run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    /// A dependency in one of these states unblocks its dependents.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// A single unit of planned work.
///
/// # Invariants
/// - `retry_count <= max_retries` once the executor has finished with the step
/// - `actual_duration_ms` is set exactly when the step reached `Completed` or `Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
    /// Ids of steps in the same plan that must finish first
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Tools the step expects to use
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Step {
    /// Create a pending, medium-priority step with no dependencies.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: StepStatus::Pending,
            dependencies: Vec::new(),
            estimated_duration_ms: None,
            actual_duration_ms: None,
            start_time: None,
            end_time: None,
            tools: Vec::new(),
            output: None,
            error: None,
            priority: Priority::Medium,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, step_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(step_ids.into_iter().map(Into::into));
        self
    }

    pub fn with_estimate_ms(mut self, estimate_ms: u64) -> Self {
        self.estimated_duration_ms = Some(estimate_ms);
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    // State transitions

    pub(crate) fn begin(&mut self) {
        self.status = StepStatus::InProgress;
        self.start_time = Some(Utc::now());
        self.end_time = None;
        self.error = None;
    }

    pub(crate) fn complete(&mut self, output: String, duration_ms: u64) {
        self.status = StepStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.end_time = Some(Utc::now());
        self.actual_duration_ms = Some(duration_ms);
    }

    pub(crate) fn fail(&mut self, error: String, duration_ms: u64) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.end_time = Some(Utc::now());
        self.actual_duration_ms = Some(duration_ms);
    }

    pub(crate) fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.error = Some(reason.into());
        self.end_time = Some(Utc::now());
    }

    /// Whether resuming the plan should run this step again.
    pub fn is_resettable(&self) -> bool {
        match self.status {
            StepStatus::Failed => true,
            StepStatus::Skipped => self.error.as_deref() == Some(DEPENDENCIES_NOT_COMPLETED),
            _ => false,
        }
    }

    /// Put a failed or dependency-skipped step back to `Pending` with a
    /// fresh retry budget.
    ///
    /// Returns `false` (and leaves the step untouched) for any other step.
    pub fn reset(&mut self) -> bool {
        if !self.is_resettable() {
            return false;
        }
        self.status = StepStatus::Pending;
        self.retry_count = 0;
        self.error = None;
        self.output = None;
        self.start_time = None;
        self.end_time = None;
        self.actual_duration_ms = None;
        true
    }
}
