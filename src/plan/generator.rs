//! Plan generation, validation, optimization and adaptation.
//!
//! # Planning Order
//! 1. Template registered for `task.type` (adapted to the payload)
//! 2. Completion service, mapped into steps `<planId>-step-<n>`
//! 3. Single-step fallback plan
//!
//! `create_plan` never fails: every completion error ends in step 3.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::completion::{CompletionError, GeneratedPlan, PlanCompletion, PlanRequest};
use super::plan::{Plan, PlanStatus};
use super::step::{Step, DEFAULT_MAX_RETRIES};
use super::templates::{PlanTemplate, TemplateRegistry};
use crate::agents::AgentContext;
use crate::task::Task;

/// Estimate for generated steps that carry none.
pub const DEFAULT_GENERATED_ESTIMATE_MS: u64 = 5000;
/// Estimate of the single fallback step.
pub const FALLBACK_ESTIMATE_MS: u64 = 10_000;
/// Per-step estimate assumed by optimization when a step has none.
pub const DEFAULT_OPTIMIZE_ESTIMATE_MS: u64 = 1000;

/// Turns tasks into plans.
pub struct PlanGenerator {
    templates: RwLock<TemplateRegistry>,
    completion: Option<Arc<dyn PlanCompletion>>,
    max_retries: u32,
}

impl PlanGenerator {
    /// Generator with the built-in templates and no completion service.
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(TemplateRegistry::with_builtins()),
            completion: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_completion(mut self, completion: Arc<dyn PlanCompletion>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = RwLock::new(templates);
        self
    }

    /// Retry budget given to generated and fallback steps.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub async fn add_template(&self, template: PlanTemplate) {
        self.templates.write().await.add_template(template);
    }

    pub async fn list_templates(&self) -> Vec<String> {
        self.templates.read().await.list_templates()
    }

    /// Produce a draft plan for `task`.
    pub async fn create_plan(&self, task: &Task, context: &AgentContext) -> Plan {
        if let Some(plan) = self.plan_from_template(&task.task_type, task).await {
            tracing::debug!("Using template {} for task {}", task.task_type, task.id);
            return plan;
        }

        let Some(completion) = &self.completion else {
            tracing::debug!(
                "No completion service configured, using fallback plan for task {}",
                task.id
            );
            return self.fallback_plan(task);
        };

        let request = PlanRequest::create(task, context);
        match Self::request_plan(completion.as_ref(), &request).await {
            Ok(generated) => self.plan_from_generated(task, generated),
            Err(e) => {
                tracing::warn!("Plan generation failed for task {}: {}", task.id, e);
                self.fallback_plan(task)
            }
        }
    }

    /// Problems that make a plan inconsistent. Empty means valid.
    pub fn validate_plan(plan: &Plan) -> Vec<String> {
        let mut errors = Vec::new();

        if plan.steps.is_empty() {
            errors.push("Plan must have at least one step".to_string());
        }

        let mut seen = HashSet::new();
        for step in &plan.steps {
            if !seen.insert(step.id.as_str()) {
                errors.push(format!("Duplicate step id {}", step.id));
            }
        }

        for step in &plan.steps {
            for dep in &step.dependencies {
                if !seen.contains(dep.as_str()) {
                    errors.push(format!(
                        "Step {} depends on non-existent step {}",
                        step.id, dep
                    ));
                }
            }
        }

        errors
    }

    /// Reorder steps, recompute the estimate and score the plan.
    ///
    /// The stable sort puts higher priorities and fewer dependencies first;
    /// execution order is still decided by the executor.
    pub fn optimize_plan(mut plan: Plan) -> Plan {
        plan.steps
            .sort_by_key(|s| (s.priority.rank(), s.dependencies.len()));

        plan.estimated_total_duration_ms = Some(
            plan.steps
                .iter()
                .map(|s| s.estimated_duration_ms.unwrap_or(DEFAULT_OPTIMIZE_ESTIMATE_MS))
                .sum(),
        );

        let score = optimization_score(&plan);
        plan.optimization_score =
            Some(plan.optimization_score.map_or(score, |prev| prev.max(score)));
        plan.status = PlanStatus::Validated;
        plan.touch();
        plan
    }

    /// Ask the completion service to revise `plan` after a step failure.
    ///
    /// Revised fields are laid over the existing steps by position; extra
    /// revised steps are appended. The plan comes back unchanged when no
    /// completion service is configured or the request fails.
    pub async fn adapt_plan(&self, plan: Plan, failed_step_id: &str, error: &str) -> Plan {
        let Some(completion) = &self.completion else {
            return plan;
        };

        let request = PlanRequest::adapt(&plan, failed_step_id, error);
        match Self::request_plan(completion.as_ref(), &request).await {
            Ok(revised) => {
                tracing::info!(
                    "Adapted plan {} after failure of step {}",
                    plan.id,
                    failed_step_id
                );
                self.overlay(plan, revised)
            }
            Err(e) => {
                tracing::warn!("Failed to adapt plan {}: {}", plan.id, e);
                plan
            }
        }
    }

    /// Instantiate the template `name` for `task`, if registered.
    pub async fn plan_from_template(&self, name: &str, task: &Task) -> Option<Plan> {
        let templates = self.templates.read().await;
        templates
            .get_template(name)
            .map(|template| template.instantiate(task))
    }

    async fn request_plan(
        completion: &dyn PlanCompletion,
        request: &PlanRequest,
    ) -> Result<GeneratedPlan, CompletionError> {
        let generated = completion.complete(request).await?;
        generated.check()?;
        Ok(generated)
    }

    fn plan_from_generated(&self, task: &Task, generated: GeneratedPlan) -> Plan {
        let plan_id = Plan::id_for_task(&task.id);
        let steps: Vec<Step> = generated
            .steps
            .into_iter()
            .enumerate()
            .map(|(idx, g)| {
                Step::new(Plan::generated_step_id(&plan_id, idx + 1), g.title, g.description)
                    .with_priority(g.priority)
                    .with_estimate_ms(
                        g.estimated_duration_ms
                            .unwrap_or(DEFAULT_GENERATED_ESTIMATE_MS),
                    )
                    .with_tools(g.tools.unwrap_or_default())
                    .with_dependencies(
                        g.dependencies
                            .iter()
                            .map(|&dep| Plan::generated_step_id(&plan_id, dep + 1)),
                    )
                    .with_max_retries(self.max_retries)
            })
            .collect();

        let mut plan = Plan::new(plan_id, generated.title, generated.description, steps);
        plan.estimated_total_duration_ms =
            Some(plan.steps.iter().filter_map(|s| s.estimated_duration_ms).sum());
        plan
    }

    fn fallback_plan(&self, task: &Task) -> Plan {
        let plan_id = Plan::id_for_task(&task.id);
        let step = Step::new(
            Plan::generated_step_id(&plan_id, 1),
            format!("Execute {} task", task.task_type),
            format!("Perform the {} task with fallback approach", task.task_type),
        )
        .with_estimate_ms(FALLBACK_ESTIMATE_MS)
        .with_max_retries(self.max_retries);

        let mut plan = Plan::new(
            plan_id,
            format!("Fallback plan for {}", task.task_type),
            "Basic plan generated because structured planning was unavailable",
            vec![step],
        );
        plan.estimated_total_duration_ms = Some(FALLBACK_ESTIMATE_MS);
        plan
    }

    fn overlay(&self, mut plan: Plan, revised: GeneratedPlan) -> Plan {
        let ids: Vec<String> = (0..revised.steps.len())
            .map(|idx| match plan.steps.get(idx) {
                Some(step) => step.id.clone(),
                None => Plan::generated_step_id(&plan.id, idx + 1),
            })
            .collect();

        for (idx, g) in revised.steps.into_iter().enumerate() {
            let dependencies: Vec<String> =
                g.dependencies.iter().map(|&d| ids[d].clone()).collect();
            match plan.steps.get_mut(idx) {
                Some(step) => {
                    step.title = g.title;
                    step.description = g.description;
                    step.priority = g.priority;
                    if let Some(estimate) = g.estimated_duration_ms {
                        step.estimated_duration_ms = Some(estimate);
                    }
                    if let Some(tools) = g.tools {
                        step.tools = tools;
                    }
                    step.dependencies = dependencies;
                }
                None => plan.steps.push(
                    Step::new(ids[idx].clone(), g.title, g.description)
                        .with_priority(g.priority)
                        .with_estimate_ms(
                            g.estimated_duration_ms.unwrap_or(DEFAULT_GENERATED_ESTIMATE_MS),
                        )
                        .with_tools(g.tools.unwrap_or_default())
                        .with_dependencies(dependencies)
                        .with_max_retries(self.max_retries),
                ),
            }
        }

        plan.status = PlanStatus::Validated;
        plan.touch();
        plan
    }
}

impl Default for PlanGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Heuristic trust score in `[0, 100]`.
///
/// Starts at 100 and loses points for validation problems and for steps
/// without an estimate or tool list.
fn optimization_score(plan: &Plan) -> u8 {
    if plan.steps.is_empty() {
        return 0;
    }
    let problems = PlanGenerator::validate_plan(plan).len() as i64;
    let unestimated = plan
        .steps
        .iter()
        .filter(|s| s.estimated_duration_ms.is_none())
        .count() as i64;
    let untooled = plan.steps.iter().filter(|s| s.tools.is_empty()).count() as i64;

    (100 - 20 * problems - 5 * unestimated - 2 * untooled).clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::completion::GeneratedStep;
    use crate::task::Priority;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns canned results and records every request purpose.
    struct CannedCompletion {
        reply: Result<GeneratedPlan, String>,
        requests: Mutex<Vec<PlanRequest>>,
    }

    impl CannedCompletion {
        fn ok(plan: GeneratedPlan) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(plan),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("service unavailable".to_string()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PlanCompletion for CannedCompletion {
        async fn complete(&self, request: &PlanRequest) -> Result<GeneratedPlan, CompletionError> {
            self.requests.lock().unwrap().push(request.clone());
            self.reply.clone().map_err(CompletionError::Llm)
        }
    }

    fn gen_step(title: &str, priority: Priority, deps: Vec<usize>) -> GeneratedStep {
        GeneratedStep {
            title: title.to_string(),
            description: format!("{} description", title),
            priority,
            estimated_duration_ms: None,
            tools: Some(vec!["shell".to_string()]),
            dependencies: deps,
        }
    }

    fn three_step_plan() -> GeneratedPlan {
        GeneratedPlan {
            title: "Refactor".to_string(),
            description: "Split the module".to_string(),
            steps: vec![
                gen_step("Read", Priority::High, vec![]),
                gen_step("Split", Priority::Critical, vec![0]),
                gen_step("Check", Priority::Medium, vec![0, 1]),
            ],
        }
    }

    fn task(task_type: &str) -> Task {
        Task::new("t1", task_type, json!({"prompt": "do it"})).unwrap()
    }

    #[tokio::test]
    async fn test_template_wins_over_completion() {
        let completion = CannedCompletion::ok(three_step_plan());
        let generator = PlanGenerator::new().with_completion(completion.clone());
        let plan = generator
            .create_plan(&task("debugging"), &AgentContext::empty())
            .await;

        assert_eq!(plan.title, "Debugging Plan");
        assert!(completion.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generated_steps_get_synthetic_ids() {
        let completion = CannedCompletion::ok(three_step_plan());
        let generator = PlanGenerator::new()
            .with_completion(completion.clone())
            .with_max_retries(5);
        let plan = generator
            .create_plan(&task("refactor"), &AgentContext::empty())
            .await;

        assert_eq!(plan.id, "plan-t1");
        assert_eq!(plan.title, "Refactor");
        let check = plan.step("plan-t1-step-3").unwrap();
        assert_eq!(check.dependencies, vec!["plan-t1-step-1", "plan-t1-step-2"]);
        assert_eq!(check.estimated_duration_ms, Some(DEFAULT_GENERATED_ESTIMATE_MS));
        assert_eq!(check.max_retries, 5);
        assert_eq!(plan.estimated_total_duration_ms, Some(15_000));
        assert!(PlanGenerator::validate_plan(&plan).is_empty());

        let requests = completion.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, 0.3);
    }

    #[tokio::test]
    async fn test_completion_error_falls_back() {
        let generator = PlanGenerator::new().with_completion(CannedCompletion::failing());
        let plan = generator
            .create_plan(&task("refactor"), &AgentContext::empty())
            .await;

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].id, "plan-t1-step-1");
        assert_eq!(plan.steps[0].title, "Execute refactor task");
        assert_eq!(plan.steps[0].estimated_duration_ms, Some(FALLBACK_ESTIMATE_MS));
    }

    #[tokio::test]
    async fn test_schema_violation_falls_back() {
        let mut bad = three_step_plan();
        bad.steps[1].dependencies = vec![7];
        let generator = PlanGenerator::new().with_completion(CannedCompletion::ok(bad));
        let plan = generator
            .create_plan(&task("refactor"), &AgentContext::empty())
            .await;

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].title, "Execute refactor task");
    }

    #[tokio::test]
    async fn test_cyclic_reply_falls_back() {
        let cyclic = GeneratedPlan {
            title: "C".to_string(),
            description: String::new(),
            steps: vec![
                gen_step("A", Priority::Medium, vec![1]),
                gen_step("B", Priority::Medium, vec![0]),
            ],
        };
        let generator = PlanGenerator::new().with_completion(CannedCompletion::ok(cyclic));
        let plan = generator
            .create_plan(&task("refactor"), &AgentContext::empty())
            .await;

        assert_eq!(plan.title, "Fallback plan for refactor");
        assert_eq!(plan.steps.len(), 1);
        assert!(crate::plan::execution_order(&plan.steps).is_ok());
    }

    #[tokio::test]
    async fn test_no_completion_service_falls_back() {
        let plan = PlanGenerator::new()
            .create_plan(&task("translate"), &AgentContext::empty())
            .await;
        assert_eq!(plan.title, "Fallback plan for translate");
    }

    #[tokio::test]
    async fn test_runtime_templates() {
        let generator = PlanGenerator::new();
        generator
            .add_template(PlanTemplate::new(
                "deploy",
                "Deploy Plan",
                "Ship a build",
                vec![Step::new("ship", "Ship", "Push the artifact")],
            ))
            .await;

        assert!(generator.list_templates().await.contains(&"deploy".to_string()));
        let plan = generator
            .create_plan(&task("deploy"), &AgentContext::empty())
            .await;
        assert_eq!(plan.title, "Deploy Plan");
        assert_eq!(plan.steps[0].id, "ship");
    }

    #[test]
    fn test_validate_reports_each_problem() {
        let plan = Plan::new(
            "p",
            "t",
            "d",
            vec![
                Step::new("a", "A", ""),
                Step::new("a", "A again", ""),
                Step::new("b", "B", "").with_dependencies(["ghost", "phantom"]),
            ],
        );
        let errors = PlanGenerator::validate_plan(&plan);
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&"Duplicate step id a".to_string()));
        assert!(errors.contains(&"Step b depends on non-existent step ghost".to_string()));
        assert!(errors.iter().any(|e| e.contains("b") && e.contains("phantom")));

        let empty = Plan::new("p", "t", "d", vec![]);
        assert_eq!(
            PlanGenerator::validate_plan(&empty),
            vec!["Plan must have at least one step"]
        );
    }

    #[test]
    fn test_optimize_orders_and_scores() {
        let plan = Plan::new(
            "p",
            "t",
            "d",
            vec![
                Step::new("low", "L", "").with_priority(Priority::Low),
                Step::new("two-deps", "M2", "").with_dependencies(["low", "one-dep"]),
                Step::new("one-dep", "M1", "").with_dependency("low"),
                Step::new("crit", "C", "")
                    .with_priority(Priority::Critical)
                    .with_estimate_ms(4000),
            ],
        );
        assert!(plan.optimization_score.is_none());

        let optimized = PlanGenerator::optimize_plan(plan);
        let ids: Vec<&str> = optimized.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["crit", "one-dep", "two-deps", "low"]);
        assert_eq!(optimized.estimated_total_duration_ms, Some(7000));
        assert_eq!(optimized.status, PlanStatus::Validated);

        let score = optimized.optimization_score.unwrap();
        assert!(score <= 100);

        let again = PlanGenerator::optimize_plan(optimized);
        assert!(again.optimization_score.unwrap() >= score);
    }

    #[test]
    fn test_optimize_never_lowers_score() {
        let mut plan = Plan::new("p", "t", "d", vec![Step::new("a", "A", "")]);
        plan.optimization_score = Some(100);
        let optimized = PlanGenerator::optimize_plan(plan);
        assert_eq!(optimized.optimization_score, Some(100));
    }

    #[tokio::test]
    async fn test_adapt_overlays_by_position() {
        let revised = GeneratedPlan {
            title: "Revised".to_string(),
            description: String::new(),
            steps: vec![
                gen_step("Reproduce with logging", Priority::Critical, vec![]),
                gen_step("Fix", Priority::High, vec![0]),
                gen_step("Extra check", Priority::Low, vec![1]),
            ],
        };
        let completion = CannedCompletion::ok(revised);
        let generator = PlanGenerator::new().with_completion(completion.clone());

        let plan = Plan::new(
            "plan-t1",
            "Original",
            "",
            vec![
                Step::new("repro", "Reproduce", "").with_estimate_ms(700),
                Step::new("fix", "Fix", "").with_dependency("repro"),
            ],
        );
        let adapted = generator.adapt_plan(plan, "repro", "could not reproduce").await;

        assert_eq!(adapted.status, PlanStatus::Validated);
        assert_eq!(adapted.steps.len(), 3);
        assert_eq!(adapted.steps[0].id, "repro");
        assert_eq!(adapted.steps[0].title, "Reproduce with logging");
        assert_eq!(adapted.steps[0].estimated_duration_ms, Some(700));
        assert_eq!(adapted.steps[1].dependencies, vec!["repro"]);
        assert_eq!(adapted.steps[2].id, "plan-t1-step-3");
        assert_eq!(adapted.steps[2].dependencies, vec!["fix"]);

        let requests = completion.requests.lock().unwrap();
        assert_eq!(requests[0].temperature, 0.4);
    }

    #[tokio::test]
    async fn test_adapt_failure_keeps_plan() {
        let generator = PlanGenerator::new().with_completion(CannedCompletion::failing());
        let plan = Plan::new("p", "Original", "", vec![Step::new("a", "A", "")]);
        let adapted = generator.adapt_plan(plan.clone(), "a", "boom").await;
        assert_eq!(adapted, plan);
    }
}
