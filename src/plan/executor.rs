//! Plan executor - runs the steps of a plan in dependency order.
//!
//! # Per-step Algorithm
//! 1. Only `Pending` steps run; anything else is left as found
//! 2. Mark `InProgress`, then check dependencies; an unmet dependency
//!    skips the step with "Dependencies not completed"
//! 3. Invoke the [`StepAction`] in a bounded retry loop: an always-failing
//!    action is invoked `max_retries + 1` times
//! 4. A failed `Critical` step halts the run; later steps stay `Pending`
//!
//! A dependency is met when it is `Completed`, or `Skipped` for a reason
//! other than an upstream failure in the current run. Skips caused by a
//! failure therefore propagate down the whole chain.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use super::action::{StepAction, StepContext};
use super::order::execution_order;
use super::plan::{Plan, PlanStatus};
pub use super::step::DEPENDENCIES_NOT_COMPLETED;
use super::step::{Step, StepStatus};
use crate::task::Priority;

/// Fatal plan errors raised to the executor's caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("Circular dependency detected involving step {step_id}")]
    CircularDependency { step_id: String },
}

/// Aggregate step statistics for a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub pending_steps: usize,
    pub in_progress_steps: usize,
    pub skipped_steps: usize,
    /// Completed steps as a percentage of all steps
    pub success_rate: f64,
    /// Mean of recorded step durations
    pub average_step_duration_ms: f64,
}

/// Executes plans against a [`StepAction`].
pub struct PlanExecutor {
    action: Arc<dyn StepAction>,
    retry_backoff: Duration,
    history: RwLock<HashMap<String, Vec<Step>>>,
}

impl PlanExecutor {
    pub fn new(action: Arc<dyn StepAction>) -> Self {
        Self {
            action,
            retry_backoff: Duration::ZERO,
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Base delay between attempts of a step, doubled on every retry.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Execute every pending step of `plan`.
    ///
    /// # Errors
    /// `CircularDependency` when the steps cannot be ordered. No step has
    /// run in that case.
    pub async fn execute_plan(
        &self,
        mut plan: Plan,
        ctx: &StepContext<'_>,
    ) -> Result<Plan, ExecutorError> {
        let order = execution_order(&plan.steps)?;

        plan.status = PlanStatus::Executing;
        plan.touch();
        tracing::info!("Executing plan {} ({} steps)", plan.id, plan.steps.len());

        // Steps that failed or were skipped because of a failure in this run.
        let mut blocked: HashSet<String> = HashSet::new();

        for idx in order {
            if plan.steps[idx].status != StepStatus::Pending {
                continue;
            }

            plan.steps[idx].begin();

            if !dependencies_met(&plan.steps, idx, &blocked) {
                let step = &mut plan.steps[idx];
                tracing::warn!("Skipping step {}: {}", step.id, DEPENDENCIES_NOT_COMPLETED);
                step.skip(DEPENDENCIES_NOT_COMPLETED);
                blocked.insert(step.id.clone());
                continue;
            }

            self.run_step(&mut plan.steps[idx], ctx).await;

            let step = &plan.steps[idx];
            if step.status == StepStatus::Failed {
                blocked.insert(step.id.clone());
                if step.priority == Priority::Critical {
                    tracing::error!(
                        "Critical step {} failed, halting plan {}",
                        step.id,
                        plan.id
                    );
                    plan.status = PlanStatus::Failed;
                    self.finish(&mut plan).await;
                    return Ok(plan);
                }
            }
        }

        plan.status = if plan.all_settled() {
            PlanStatus::Completed
        } else if plan.has_failures() {
            PlanStatus::Failed
        } else {
            PlanStatus::Executing
        };
        self.finish(&mut plan).await;

        tracing::info!(
            "Plan {} finished with status {:?} in {}ms",
            plan.id,
            plan.status,
            plan.actual_total_duration_ms.unwrap_or(0)
        );
        Ok(plan)
    }

    /// Re-run a plan after failures.
    ///
    /// Failed steps, and steps skipped because their dependencies did not
    /// complete, go back to `Pending` with a fresh retry budget. Completed
    /// steps and steps skipped for other reasons are not run again.
    pub async fn resume_execution(
        &self,
        mut plan: Plan,
        ctx: &StepContext<'_>,
    ) -> Result<Plan, ExecutorError> {
        let resumable = plan
            .steps
            .iter()
            .any(|s| s.status == StepStatus::Pending || s.is_resettable());
        if !resumable {
            plan.status = PlanStatus::Completed;
            plan.touch();
            return Ok(plan);
        }

        let mut reset = 0;
        for step in plan.steps.iter_mut() {
            if step.reset() {
                reset += 1;
            }
        }
        tracing::info!("Resuming plan {} ({} step(s) reset)", plan.id, reset);

        self.execute_plan(plan, ctx).await
    }

    /// Step statistics for `plan`.
    pub fn step_metrics(plan: &Plan) -> StepMetrics {
        let count = |status: StepStatus| plan.steps.iter().filter(|s| s.status == status).count();

        let total_steps = plan.steps.len();
        let completed_steps = count(StepStatus::Completed);

        let durations: Vec<u64> = plan
            .steps
            .iter()
            .filter_map(|s| s.actual_duration_ms)
            .collect();
        let average_step_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };

        StepMetrics {
            total_steps,
            completed_steps,
            failed_steps: count(StepStatus::Failed),
            pending_steps: count(StepStatus::Pending),
            in_progress_steps: count(StepStatus::InProgress),
            skipped_steps: count(StepStatus::Skipped),
            success_rate: if total_steps == 0 {
                0.0
            } else {
                completed_steps as f64 / total_steps as f64 * 100.0
            },
            average_step_duration_ms,
        }
    }

    /// Steps of the last run of `plan_id`, empty if it never ran.
    pub async fn execution_history(&self, plan_id: &str) -> Vec<Step> {
        self.history
            .read()
            .await
            .get(plan_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn run_step(&self, step: &mut Step, ctx: &StepContext<'_>) {
        let started = Instant::now();

        loop {
            match self.action.perform(step, ctx).await {
                Ok(output) => {
                    tracing::debug!("Step {} completed", step.id);
                    step.complete(output, elapsed_ms(started));
                    return;
                }
                Err(e) if step.retry_count < step.max_retries => {
                    step.retry_count += 1;
                    tracing::warn!(
                        "Step {} failed (attempt {}/{}): {:#}",
                        step.id,
                        step.retry_count,
                        step.max_retries + 1,
                        e
                    );
                    if !self.retry_backoff.is_zero() {
                        let factor = 2u32.saturating_pow(step.retry_count - 1);
                        tokio::time::sleep(self.retry_backoff.saturating_mul(factor)).await;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "Step {} failed after {} retries: {:#}",
                        step.id,
                        step.retry_count,
                        e
                    );
                    step.fail(format!("{:#}", e), elapsed_ms(started));
                    return;
                }
            }
        }
    }

    async fn finish(&self, plan: &mut Plan) {
        plan.actual_total_duration_ms = Some(plan.total_actual_duration_ms());
        plan.touch();
        self.history
            .write()
            .await
            .insert(plan.id.clone(), plan.steps.clone());
    }
}

fn dependencies_met(steps: &[Step], idx: usize, blocked: &HashSet<String>) -> bool {
    steps[idx].dependencies.iter().all(|dep_id| {
        steps.iter().find(|s| &s.id == dep_id).is_some_and(|dep| match dep.status {
            StepStatus::Completed => true,
            StepStatus::Skipped => !blocked.contains(dep_id),
            _ => false,
        })
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentContext;
    use crate::task::Task;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails every step whose id is listed, records every invocation.
    struct ScriptedAction {
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedAction {
        fn new(failing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_for(&self, id: &str) -> usize {
            self.calls().iter().filter(|c| c.as_str() == id).count()
        }
    }

    #[async_trait]
    impl StepAction for ScriptedAction {
        async fn perform(&self, step: &Step, _ctx: &StepContext<'_>) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push(step.id.clone());
            if self.failing.contains(&step.id) {
                anyhow::bail!("{} exploded", step.id);
            }
            Ok(format!("{} done", step.id))
        }
    }

    /// Fails the first `failures` invocations, then succeeds.
    struct FlakyAction {
        failures: u32,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl StepAction for FlakyAction {
        async fn perform(&self, _step: &Step, _ctx: &StepContext<'_>) -> anyhow::Result<String> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.failures {
                anyhow::bail!("flaky");
            }
            Ok("ok".to_string())
        }
    }

    fn fixtures() -> (Task, AgentContext) {
        (
            Task::new("t1", "general", serde_json::json!({})).unwrap(),
            AgentContext::empty(),
        )
    }

    fn ctx<'a>(task: &'a Task, context: &'a AgentContext) -> StepContext<'a> {
        StepContext {
            task,
            context,
            model: "test-model",
        }
    }

    fn plan(steps: Vec<Step>) -> Plan {
        Plan::new("plan-t1", "Test plan", "", steps)
    }

    #[tokio::test]
    async fn test_runs_dependencies_before_dependents() {
        let action = ScriptedAction::new(&[]);
        let executor = PlanExecutor::new(action.clone());
        let (task, context) = fixtures();

        let plan = plan(vec![
            Step::new("c", "C", "").with_dependencies(["a", "b"]),
            Step::new("b", "B", "").with_dependency("a"),
            Step::new("a", "A", ""),
        ]);
        let result = executor.execute_plan(plan, &ctx(&task, &context)).await.unwrap();

        assert_eq!(result.status, PlanStatus::Completed);
        assert_eq!(action.calls(), vec!["a", "b", "c"]);
        assert_eq!(result.step("c").unwrap().output.as_deref(), Some("c done"));
        assert!(result.actual_total_duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_cycle_runs_nothing() {
        let action = ScriptedAction::new(&[]);
        let executor = PlanExecutor::new(action.clone());
        let (task, context) = fixtures();

        let plan = plan(vec![
            Step::new("a", "A", "").with_dependency("b"),
            Step::new("b", "B", "").with_dependency("a"),
            Step::new("free", "Free", ""),
        ]);
        let err = executor
            .execute_plan(plan, &ctx(&task, &context))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::CircularDependency { .. }));
        assert!(action.calls().is_empty());
        assert!(executor.execution_history("plan-t1").await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_bound() {
        let action = ScriptedAction::new(&["a"]);
        let executor = PlanExecutor::new(action.clone());
        let (task, context) = fixtures();

        let plan = plan(vec![Step::new("a", "A", "").with_max_retries(2)]);
        let result = executor.execute_plan(plan, &ctx(&task, &context)).await.unwrap();

        let step = result.step("a").unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.retry_count, 2);
        assert_eq!(action.calls_for("a"), 3);
        assert_eq!(step.error.as_deref(), Some("a exploded"));
        assert!(step.actual_duration_ms.is_some());
        assert_eq!(result.status, PlanStatus::Failed);
    }

    #[tokio::test]
    async fn test_zero_retries_runs_once() {
        let action = ScriptedAction::new(&["a"]);
        let executor = PlanExecutor::new(action.clone());
        let (task, context) = fixtures();

        let plan = plan(vec![Step::new("a", "A", "").with_max_retries(0)]);
        let result = executor.execute_plan(plan, &ctx(&task, &context)).await.unwrap();

        assert_eq!(action.calls_for("a"), 1);
        assert_eq!(result.step("a").unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_flaky_step_recovers_within_budget() {
        let action = Arc::new(FlakyAction {
            failures: 2,
            calls: Mutex::new(0),
        });
        let executor =
            PlanExecutor::new(action.clone()).with_retry_backoff(Duration::from_millis(1));
        let (task, context) = fixtures();

        let plan = plan(vec![Step::new("a", "A", "").with_max_retries(3)]);
        let result = executor.execute_plan(plan, &ctx(&task, &context)).await.unwrap();

        let step = result.step("a").unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.retry_count, 2);
        assert_eq!(*action.calls.lock().unwrap(), 3);
        assert_eq!(result.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn test_critical_failure_short_circuits() {
        let action = ScriptedAction::new(&["s1"]);
        let executor = PlanExecutor::new(action.clone());
        let (task, context) = fixtures();

        let plan = plan(vec![
            Step::new("s1", "S1", "")
                .with_priority(Priority::Critical)
                .with_max_retries(1),
            Step::new("s2", "S2", "").with_dependency("s1"),
            Step::new("s3", "S3", ""),
        ]);
        let result = executor.execute_plan(plan, &ctx(&task, &context)).await.unwrap();

        assert_eq!(result.status, PlanStatus::Failed);
        assert_eq!(result.step("s1").unwrap().status, StepStatus::Failed);
        assert_eq!(result.step("s2").unwrap().status, StepStatus::Pending);
        assert_eq!(result.step("s3").unwrap().status, StepStatus::Pending);
        assert_eq!(action.calls(), vec!["s1", "s1"]);
    }

    #[tokio::test]
    async fn test_skip_propagation() {
        let action = ScriptedAction::new(&["s1"]);
        let executor = PlanExecutor::new(action.clone());
        let (task, context) = fixtures();

        let plan = plan(vec![
            Step::new("s1", "S1", "").with_max_retries(0),
            Step::new("s2", "S2", "").with_dependency("s1"),
            Step::new("s3", "S3", "").with_dependency("s2"),
            Step::new("other", "Other", ""),
        ]);
        let result = executor.execute_plan(plan, &ctx(&task, &context)).await.unwrap();

        assert_eq!(result.status, PlanStatus::Failed);
        assert_eq!(result.step("s1").unwrap().status, StepStatus::Failed);
        for id in ["s2", "s3"] {
            let step = result.step(id).unwrap();
            assert_eq!(step.status, StepStatus::Skipped);
            assert_eq!(step.error.as_deref(), Some(DEPENDENCIES_NOT_COMPLETED));
        }
        assert_eq!(result.step("other").unwrap().status, StepStatus::Completed);
        assert_eq!(action.calls_for("s2"), 0);
    }

    #[tokio::test]
    async fn test_previously_skipped_dependency_counts_as_met() {
        let action = ScriptedAction::new(&[]);
        let executor = PlanExecutor::new(action.clone());
        let (task, context) = fixtures();

        let mut optional = Step::new("optional", "Optional", "");
        optional.status = StepStatus::Skipped;
        let plan = plan(vec![optional, Step::new("main", "Main", "").with_dependency("optional")]);
        let result = executor.execute_plan(plan, &ctx(&task, &context)).await.unwrap();

        assert_eq!(result.step("main").unwrap().status, StepStatus::Completed);
        assert_eq!(result.status, PlanStatus::Completed);
        assert_eq!(action.calls(), vec!["main"]);
    }

    #[tokio::test]
    async fn test_unknown_dependency_skips_step() {
        let action = ScriptedAction::new(&[]);
        let executor = PlanExecutor::new(action);
        let (task, context) = fixtures();

        let plan = plan(vec![Step::new("a", "A", "").with_dependency("ghost")]);
        let result = executor.execute_plan(plan, &ctx(&task, &context)).await.unwrap();

        assert_eq!(result.step("a").unwrap().status, StepStatus::Skipped);
        assert_eq!(result.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_reruns_only_failed_and_skipped() {
        let failing = ScriptedAction::new(&["b"]);
        let executor = PlanExecutor::new(failing);
        let (task, context) = fixtures();

        let plan = plan(vec![
            Step::new("a", "A", ""),
            Step::new("b", "B", "").with_dependency("a").with_max_retries(1),
            Step::new("c", "C", "").with_dependency("b"),
        ]);
        let failed = executor.execute_plan(plan, &ctx(&task, &context)).await.unwrap();
        assert_eq!(failed.status, PlanStatus::Failed);
        assert_eq!(failed.step("c").unwrap().status, StepStatus::Skipped);

        let healthy = ScriptedAction::new(&[]);
        let executor = PlanExecutor::new(healthy.clone());
        let resumed = executor
            .resume_execution(failed, &ctx(&task, &context))
            .await
            .unwrap();

        assert_eq!(resumed.status, PlanStatus::Completed);
        assert_eq!(healthy.calls(), vec!["b", "c"]);
        assert_eq!(resumed.step("b").unwrap().retry_count, 0);
        assert_eq!(resumed.step("a").unwrap().output.as_deref(), Some("a done"));
    }

    #[tokio::test]
    async fn test_resume_leaves_deliberately_skipped_steps_alone() {
        let failing = ScriptedAction::new(&["main"]);
        let executor = PlanExecutor::new(failing);
        let (task, context) = fixtures();

        let mut optional = Step::new("optional", "Optional", "");
        optional.skip("not needed");
        let plan = plan(vec![
            optional,
            Step::new("main", "Main", "")
                .with_dependency("optional")
                .with_max_retries(0),
        ]);
        let failed = executor.execute_plan(plan, &ctx(&task, &context)).await.unwrap();
        assert_eq!(failed.step("optional").unwrap().status, StepStatus::Skipped);
        assert_eq!(failed.step("main").unwrap().status, StepStatus::Failed);

        let healthy = ScriptedAction::new(&[]);
        let executor = PlanExecutor::new(healthy.clone());
        let resumed = executor
            .resume_execution(failed, &ctx(&task, &context))
            .await
            .unwrap();

        assert_eq!(healthy.calls(), vec!["main"]);
        let optional = resumed.step("optional").unwrap();
        assert_eq!(optional.status, StepStatus::Skipped);
        assert_eq!(optional.error.as_deref(), Some("not needed"));
        assert_eq!(resumed.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_of_finished_plan_is_a_no_op() {
        let action = ScriptedAction::new(&[]);
        let executor = PlanExecutor::new(action.clone());
        let (task, context) = fixtures();

        let done = executor
            .execute_plan(plan(vec![Step::new("a", "A", "")]), &ctx(&task, &context))
            .await
            .unwrap();
        let resumed = executor
            .resume_execution(done, &ctx(&task, &context))
            .await
            .unwrap();

        assert_eq!(resumed.status, PlanStatus::Completed);
        assert_eq!(action.calls_for("a"), 1);
    }

    #[test]
    fn test_metrics_success_rate() {
        let mut steps: Vec<Step> = (0..4)
            .map(|i| Step::new(format!("s{}", i), "S", ""))
            .collect();
        for (i, step) in steps.iter_mut().enumerate() {
            if i < 3 {
                step.begin();
                step.complete("ok".to_string(), 10 * (i as u64 + 1));
            } else {
                step.skip("not needed");
            }
        }
        let metrics = PlanExecutor::step_metrics(&plan(steps));

        assert_eq!(metrics.total_steps, 4);
        assert_eq!(metrics.completed_steps, 3);
        assert_eq!(metrics.skipped_steps, 1);
        assert_eq!(metrics.success_rate, 75.0);
        assert_eq!(metrics.average_step_duration_ms, 20.0);
    }

    #[test]
    fn test_metrics_of_empty_plan() {
        let metrics = PlanExecutor::step_metrics(&plan(Vec::new()));
        assert_eq!(metrics.total_steps, 0);
        assert_eq!(metrics.success_rate, 0.0);
        assert_eq!(metrics.average_step_duration_ms, 0.0);
    }

    #[tokio::test]
    async fn test_history_records_last_run() {
        let action = ScriptedAction::new(&[]);
        let executor = PlanExecutor::new(action);
        let (task, context) = fixtures();

        executor
            .execute_plan(plan(vec![Step::new("a", "A", "")]), &ctx(&task, &context))
            .await
            .unwrap();

        let history = executor.execution_history("plan-t1").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, StepStatus::Completed);
    }
}
