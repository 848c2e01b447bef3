//! Execution plans.
//!
//! # State Machine
//! ```text
//! Draft -> Validated -> Executing -> Completed
//!                                \-> Failed
//! ```
//!
//! `steps` keeps generation order. Execution order is never read from the
//! vector directly; it is recomputed by `order::execution_order`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::{Step, StepStatus};

/// Status of a whole plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Draft,
    Validated,
    Executing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Failed)
    }
}

/// An ordered set of steps describing how a task will be carried out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub description: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_total_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_total_duration_ms: Option<u64>,
    /// Human-readable problems found by validation (never blocks execution)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
    /// Heuristic trust score in `[0, 100]` set by optimization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_score: Option<u8>,
}

impl Plan {
    /// Create a draft plan.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<Step>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            steps,
            status: PlanStatus::Draft,
            created_at: now,
            updated_at: now,
            estimated_total_duration_ms: None,
            actual_total_duration_ms: None,
            validation_errors: Vec::new(),
            optimization_score: None,
        }
    }

    /// Plan id used for the plan generated for `task_id`.
    pub fn id_for_task(task_id: &str) -> String {
        format!("plan-{}", task_id)
    }

    /// Synthetic id of the `n`-th (1-based) generated step of a plan.
    pub fn generated_step_id(plan_id: &str, n: usize) -> String {
        format!("{}-step-{}", plan_id, n)
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Whether every step ended `Completed` or `Skipped`.
    pub fn all_settled(&self) -> bool {
        self.steps.iter().all(|s| s.status.satisfies_dependents())
    }

    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Failed)
    }

    /// Sum of recorded step durations.
    pub fn total_actual_duration_ms(&self) -> u64 {
        self.steps.iter().filter_map(|s| s.actual_duration_ms).sum()
    }

    /// Output of the step that completed last.
    pub fn final_output(&self) -> Option<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .filter_map(|s| Some((s.end_time?, s.output.as_deref()?)))
            .max_by_key(|(end, _)| *end)
            .map(|(_, output)| output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids() {
        let id = Plan::id_for_task("abc");
        assert_eq!(id, "plan-abc");
        assert_eq!(Plan::generated_step_id(&id, 2), "plan-abc-step-2");
    }

    #[test]
    fn test_settled_and_failures() {
        let mut plan = Plan::new(
            "p",
            "t",
            "d",
            vec![Step::new("a", "A", "a"), Step::new("b", "B", "b")],
        );
        assert_eq!(plan.status, PlanStatus::Draft);
        assert!(!plan.all_settled());

        plan.step_mut("a").unwrap().status = StepStatus::Completed;
        plan.step_mut("b").unwrap().status = StepStatus::Skipped;
        assert!(plan.all_settled());
        assert!(!plan.has_failures());

        plan.step_mut("b").unwrap().status = StepStatus::Failed;
        assert!(plan.has_failures());
    }

    #[test]
    fn test_final_output_is_last_completed_step() {
        let mut plan = Plan::new(
            "p",
            "t",
            "d",
            vec![
                Step::new("late", "Late", ""),
                Step::new("early", "Early", ""),
                Step::new("broken", "Broken", ""),
            ],
        );
        assert!(plan.final_output().is_none());

        let now = Utc::now();
        let early = plan.step_mut("early").unwrap();
        early.begin();
        early.complete("42".to_string(), 1);
        early.end_time = Some(now);

        let late = plan.step_mut("late").unwrap();
        late.begin();
        late.complete("The answer is 42".to_string(), 1);
        late.end_time = Some(now + chrono::Duration::milliseconds(5));

        let broken = plan.step_mut("broken").unwrap();
        broken.begin();
        broken.fail("boom".to_string(), 1);
        broken.end_time = Some(now + chrono::Duration::milliseconds(10));

        assert_eq!(plan.final_output(), Some("The answer is 42"));
    }
}
