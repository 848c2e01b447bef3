//! Agent runner - drives one task from context gathering to a final status.
//!
//! # Lifecycle
//! 1. Gather context (failures degrade to an empty context)
//! 2. Mark the agent running under the behavior chosen for the task type
//! 3. Create, validate and optimize the plan
//! 4. Select the model and execute the plan
//! 5. Optionally adapt and resume a failed plan once
//!
//! Every error is caught here and recorded on the agent; `run` itself
//! never fails.

use std::sync::Arc;

use super::behavior::{AgentBehavior, BehaviorRegistry};
use super::context::{AgentContext, ContextGatherer};
use super::types::{AgentError, AgentStatus};
use crate::plan::{Plan, PlanExecutor, PlanGenerator, PlanStatus, StepContext, StepStatus};
use crate::scheduler::registry::AgentRegistry;
use crate::task::Task;

/// Shared collaborators every agent run needs.
pub struct AgentRunner {
    generator: Arc<PlanGenerator>,
    executor: Arc<PlanExecutor>,
    gatherer: Arc<dyn ContextGatherer>,
    behaviors: BehaviorRegistry,
    registry: Arc<AgentRegistry>,
    adapt_on_failure: bool,
}

impl AgentRunner {
    pub fn new(
        generator: Arc<PlanGenerator>,
        executor: Arc<PlanExecutor>,
        gatherer: Arc<dyn ContextGatherer>,
        behaviors: BehaviorRegistry,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            generator,
            executor,
            gatherer,
            behaviors,
            registry,
            adapt_on_failure: false,
        }
    }

    pub fn with_adapt_on_failure(mut self, enabled: bool) -> Self {
        self.adapt_on_failure = enabled;
        self
    }

    pub fn behaviors(&self) -> &BehaviorRegistry {
        &self.behaviors
    }

    /// Run `task` to completion, recording everything on its agent.
    pub async fn run(&self, task: Task) {
        let id = task.id.clone();
        let behavior = self.behaviors.resolve(&task.task_type);

        let context = match self.gatherer.gather(&task).await {
            Ok(context) => {
                tracing::debug!("Context gathered for task {}", id);
                context
            }
            Err(e) => {
                tracing::warn!("Context gathering failed for task {}: {:#}", id, e);
                AgentContext::empty()
            }
        };

        self.registry.update(&id, |agent| agent.start(context.clone()));
        tracing::info!("Task {} started with {} behavior", id, behavior.name());

        let (status, error) = match self.drive(&task, behavior.as_ref(), &context).await {
            Ok(plan) if plan.status == PlanStatus::Completed => (AgentStatus::Completed, None),
            Ok(plan) => (AgentStatus::Failed, Some(failure_summary(&plan))),
            Err(e) => (AgentStatus::Failed, Some(e.to_string())),
        };

        self.registry.update(&id, |agent| agent.finish(status, error.clone()));

        let duration_ms = self
            .registry
            .get(&id)
            .and_then(|a| a.duration_ms)
            .unwrap_or(0);
        match &error {
            None => {
                let answer = self.registry.get(&id).and_then(|a| a.answer);
                tracing::info!(
                    "Task {} completed in {}ms. Answer: {}",
                    id,
                    duration_ms,
                    answer.as_deref().unwrap_or("-")
                );
            }
            Some(e) => tracing::warn!("Task {} failed after {}ms: {}", id, duration_ms, e),
        }
    }

    async fn drive(
        &self,
        task: &Task,
        behavior: &dyn AgentBehavior,
        context: &AgentContext,
    ) -> Result<Plan, AgentError> {
        let mut plan = behavior.create_plan(&self.generator, task, context).await;
        tracing::info!("Task {} created plan: {}", task.id, plan.title);

        let validation_errors = PlanGenerator::validate_plan(&plan);
        if !validation_errors.is_empty() {
            tracing::warn!(
                "Task {} plan has validation errors: {:?}",
                task.id,
                validation_errors
            );
        }
        plan.validation_errors = validation_errors;

        let plan = PlanGenerator::optimize_plan(plan);
        tracing::info!(
            "Task {} optimized plan with score {}",
            task.id,
            plan.optimization_score.unwrap_or(0)
        );

        let model = behavior.select_model(task);
        tracing::info!("Task {} selected model {}", task.id, model);

        let recorded = plan.clone();
        let recorded_model = model.clone();
        self.registry.update(&task.id, move |agent| {
            agent.plan = Some(recorded);
            agent.selected_model = Some(recorded_model);
            agent.mark_started();
        });

        let ctx = StepContext {
            task,
            context,
            model: &model,
        };
        let mut plan = self.executor.execute_plan(plan, &ctx).await?;
        self.record_plan(&task.id, &plan);

        if plan.status == PlanStatus::Failed && self.adapt_on_failure {
            plan = self.adapt_and_resume(plan, &ctx).await?;
            self.record_plan(&task.id, &plan);
        }
        Ok(plan)
    }

    fn record_plan(&self, id: &str, plan: &Plan) {
        let recorded = plan.clone();
        let answer = plan.final_output().map(str::to_string);
        self.registry.update(id, move |agent| {
            agent.plan = Some(recorded);
            agent.answer = answer;
        });
    }

    async fn adapt_and_resume(
        &self,
        plan: Plan,
        ctx: &StepContext<'_>,
    ) -> Result<Plan, AgentError> {
        let Some((step_id, error)) = first_failure(&plan) else {
            return Ok(plan);
        };
        tracing::info!("Adapting plan {} after failure of step {}", plan.id, step_id);

        let adapted = self.generator.adapt_plan(plan, &step_id, &error).await;
        Ok(self.executor.resume_execution(adapted, ctx).await?)
    }
}

fn first_failure(plan: &Plan) -> Option<(String, String)> {
    plan.steps
        .iter()
        .find(|s| s.status == StepStatus::Failed)
        .map(|s| (s.id.clone(), s.error.clone().unwrap_or_default()))
}

fn failure_summary(plan: &Plan) -> String {
    match first_failure(plan) {
        Some((step_id, error)) => format!("Step {} failed: {}", step_id, error),
        None => format!("Plan {} ended with status {:?}", plan.id, plan.status),
    }
}
