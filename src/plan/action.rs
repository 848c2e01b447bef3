//! Step actions - the pluggable "do the work" collaborator of the executor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use regex::Regex;

use super::step::Step;
use crate::agents::AgentContext;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::task::Task;
use crate::util::preview;

/// Read-only inputs available to a step action.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub task: &'a Task,
    pub context: &'a AgentContext,
    /// Model selected for the agent running this plan
    pub model: &'a str,
}

/// Performs one step of a plan.
///
/// # Contract
/// `Ok` carries the step output; `Err` is one failed attempt and the
/// executor decides whether to retry.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn perform(&self, step: &Step, ctx: &StepContext<'_>) -> anyhow::Result<String>;
}

/// Upper bound on simulated work per step.
const DEFAULT_MAX_SIMULATED_WORK: Duration = Duration::from_millis(3000);

/// Estimate used when a step carries none.
const DEFAULT_SIMULATED_ESTIMATE_MS: u64 = 1000;

/// Sleeps for the step estimate and fails at a configurable rate.
#[derive(Debug, Clone)]
pub struct SimulatedStepAction {
    failure_rate: f64,
    max_work: Duration,
}

impl SimulatedStepAction {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            max_work: DEFAULT_MAX_SIMULATED_WORK,
        }
    }

    /// Cap the simulated work per step.
    pub fn with_max_work(mut self, max_work: Duration) -> Self {
        self.max_work = max_work;
        self
    }
}

#[async_trait]
impl StepAction for SimulatedStepAction {
    async fn perform(&self, step: &Step, _ctx: &StepContext<'_>) -> anyhow::Result<String> {
        let estimate = Duration::from_millis(
            step.estimated_duration_ms
                .unwrap_or(DEFAULT_SIMULATED_ESTIMATE_MS),
        );
        tokio::time::sleep(estimate.min(self.max_work)).await;

        if rand::random::<f64>() < self.failure_rate {
            return Err(anyhow!("Simulated failure for step: {}", step.title));
        }
        Ok(format!("Completed: {}", step.title))
    }
}

/// Carries out a step by asking the agent's model to perform it.
pub struct LlmStepAction {
    llm: Arc<dyn LlmClient>,
}

impl LlmStepAction {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn build_messages(step: &Step, ctx: &StepContext<'_>) -> Vec<ChatMessage> {
        let system = "You are an agent carrying out one step of a larger plan. \
                      Do the step and reply with its result only.";

        let mut user = format!(
            "Task type: {}\nTask: {}\n\nStep: {}\n{}",
            ctx.task.task_type,
            ctx.task.payload_text(),
            step.title,
            step.description
        );
        if !step.tools.is_empty() {
            user.push_str(&format!("\nTools: {}", step.tools.join(", ")));
        }
        if !ctx.context.is_empty() {
            user.push_str(&format!("\n\nContext:\n{}", ctx.context.summary()));
        }

        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}

#[async_trait]
impl StepAction for LlmStepAction {
    async fn perform(&self, step: &Step, ctx: &StepContext<'_>) -> anyhow::Result<String> {
        let messages = Self::build_messages(step, ctx);
        let options = ChatOptions {
            temperature: Some(0.2),
            ..ChatOptions::default()
        };

        let response = self
            .llm
            .chat_completion_with_options(ctx.model, &messages, options)
            .await?;

        let content = response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                anyhow!("Model {} returned no content for step {}", ctx.model, step.id)
            })?;

        tracing::debug!("Step {} output: {}", step.id, preview(&content, 120));
        Ok(content)
    }
}

/// Tool name that routes a step to the expression evaluator.
pub const CALCULATOR_TOOL: &str = "calculator";

/// Evaluates the task's arithmetic for steps that use the calculator tool.
///
/// The expression comes from the payload's `expression` field, or else the
/// longest arithmetic run found in the task text. Steps without the tool,
/// tasks without an expression, and expressions that do not evaluate are
/// handed to the wrapped action.
pub struct CalculatorStepAction {
    inner: Arc<dyn StepAction>,
}

impl CalculatorStepAction {
    pub fn new(inner: Arc<dyn StepAction>) -> Self {
        Self { inner }
    }

    fn find_expression(task: &Task) -> Option<String> {
        if let Some(expr) = task.payload.get("expression").and_then(|v| v.as_str()) {
            let expr = expr.trim();
            if !expr.is_empty() {
                return Some(expr.to_string());
            }
        }

        let re = Regex::new(r"[\d(][\d\s.()+\-*/^%]*[\d)]").ok()?;
        let text = task.payload_text();
        re.find_iter(&text)
            .map(|m| m.as_str().trim())
            .filter(|m| m.contains(|c: char| "+-*/^%".contains(c)))
            .max_by_key(|m| m.len())
            .map(str::to_string)
    }
}

#[async_trait]
impl StepAction for CalculatorStepAction {
    async fn perform(&self, step: &Step, ctx: &StepContext<'_>) -> anyhow::Result<String> {
        if !step.tools.iter().any(|tool| tool == CALCULATOR_TOOL) {
            return self.inner.perform(step, ctx).await;
        }

        let Some(expr) = Self::find_expression(ctx.task) else {
            return self.inner.perform(step, ctx).await;
        };

        match evalexpr::eval(&expr) {
            Ok(value) => {
                tracing::debug!("Step {} evaluated {} = {}", step.id, expr, value);
                Ok(format!("{} = {}", expr, value))
            }
            Err(e) => {
                tracing::warn!("Step {} cannot evaluate {}: {}", step.id, expr, e);
                self.inner.perform(step, ctx).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use serde_json::json;
    use std::sync::Mutex;

    struct EchoLlm {
        seen_models: Mutex<Vec<String>>,
        reply: Option<String>,
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn chat_completion(
            &self,
            model: &str,
            messages: &[ChatMessage],
        ) -> anyhow::Result<ChatResponse> {
            self.seen_models.lock().unwrap().push(model.to_string());
            assert_eq!(messages.len(), 2);
            Ok(ChatResponse {
                content: self.reply.clone(),
                finish_reason: Some("stop".to_string()),
                usage: None,
                model: Some(model.to_string()),
            })
        }
    }

    fn task() -> Task {
        Task::new("t1", "math-problem", json!({"prompt": "2+2"})).unwrap()
    }

    #[tokio::test]
    async fn test_simulated_action_never_fails_at_zero_rate() {
        let action = SimulatedStepAction::new(0.0).with_max_work(Duration::from_millis(1));
        let step = Step::new("s1", "Solve", "solve it").with_estimate_ms(50);
        let task = task();
        let context = AgentContext::empty();
        let ctx = StepContext {
            task: &task,
            context: &context,
            model: "m",
        };
        for _ in 0..5 {
            assert_eq!(action.perform(&step, &ctx).await.unwrap(), "Completed: Solve");
        }
    }

    #[tokio::test]
    async fn test_simulated_action_always_fails_at_full_rate() {
        let action = SimulatedStepAction::new(1.0).with_max_work(Duration::from_millis(1));
        let step = Step::new("s1", "Solve", "solve it");
        let task = task();
        let context = AgentContext::empty();
        let ctx = StepContext {
            task: &task,
            context: &context,
            model: "m",
        };
        assert!(action.perform(&step, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_llm_action_uses_selected_model() {
        let llm = Arc::new(EchoLlm {
            seen_models: Mutex::new(Vec::new()),
            reply: Some("4".to_string()),
        });
        let action = LlmStepAction::new(llm.clone());
        let step = Step::new("s1", "Solve", "solve it");
        let task = task();
        let context = AgentContext::empty();
        let ctx = StepContext {
            task: &task,
            context: &context,
            model: "openai/gpt-4o-mini",
        };

        assert_eq!(action.perform(&step, &ctx).await.unwrap(), "4");
        assert_eq!(
            llm.seen_models.lock().unwrap().as_slice(),
            &["openai/gpt-4o-mini".to_string()]
        );
    }

    #[tokio::test]
    async fn test_llm_action_rejects_empty_reply() {
        let llm = Arc::new(EchoLlm {
            seen_models: Mutex::new(Vec::new()),
            reply: Some("   ".to_string()),
        });
        let action = LlmStepAction::new(llm);
        let step = Step::new("s1", "Solve", "solve it");
        let task = task();
        let context = AgentContext::empty();
        let ctx = StepContext {
            task: &task,
            context: &context,
            model: "m",
        };
        assert!(action.perform(&step, &ctx).await.is_err());
    }

    struct Fixed;

    #[async_trait]
    impl StepAction for Fixed {
        async fn perform(&self, step: &Step, _ctx: &StepContext<'_>) -> anyhow::Result<String> {
            Ok(format!("inner: {}", step.id))
        }
    }

    async fn calculate(payload: serde_json::Value, step: &Step) -> String {
        let action = CalculatorStepAction::new(Arc::new(Fixed));
        let task = Task::new("t1", "math", payload).unwrap();
        let context = AgentContext::empty();
        let ctx = StepContext {
            task: &task,
            context: &context,
            model: "m",
        };
        action.perform(step, &ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_calculator_evaluates_prompt_arithmetic() {
        let step = Step::new("calc", "Calculate", "do the math").with_tools([CALCULATOR_TOOL]);
        let output = calculate(json!({"prompt": "What is (12 + 7) * 3?"}), &step).await;
        assert_eq!(output, "(12 + 7) * 3 = 57");

        let output = calculate(json!({"expression": " 10 / 4 + 1 "}), &step).await;
        assert_eq!(output, "10 / 4 + 1 = 3");
    }

    #[tokio::test]
    async fn test_calculator_delegates_without_tool_or_expression() {
        let plain = Step::new("plain", "Explain", "explain it");
        let output = calculate(json!({"prompt": "What is 2 + 2?"}), &plain).await;
        assert_eq!(output, "inner: plain");

        let calc = Step::new("calc", "Calculate", "do the math").with_tools([CALCULATOR_TOOL]);
        let output = calculate(json!({"prompt": "A 7 mile ride costs how much?"}), &calc).await;
        assert_eq!(output, "inner: calc");

        let output = calculate(json!({"expression": "1 / 0"}), &calc).await;
        assert_eq!(output, "inner: calc");
    }
}
