//! Agent behaviors - per-task-type strategies for planning and model choice.
//!
//! A behavior is picked once, when the agent is created, by looking up the
//! task type in a [`BehaviorRegistry`]. Unknown types get the registry's
//! default behavior.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::AgentContext;
use crate::config::Config;
use crate::plan::templates::{wants_explanation, MATH_PROBLEM};
use crate::plan::{Plan, PlanGenerator};
use crate::task::Task;

/// Strategy for one kind of task.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    /// Short name recorded on the agent.
    fn name(&self) -> &str;

    /// Build the draft plan. Defaults to the generator's planning order.
    async fn create_plan(
        &self,
        generator: &PlanGenerator,
        task: &Task,
        context: &AgentContext,
    ) -> Plan {
        generator.create_plan(task, context).await
    }

    /// Model for the task's steps. Pure in `task`.
    fn select_model(&self, task: &Task) -> String;
}

/// Plans with the generator and always uses the configured default model.
pub struct GeneralBehavior {
    model: String,
}

impl GeneralBehavior {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl AgentBehavior for GeneralBehavior {
    fn name(&self) -> &str {
        "general"
    }

    fn select_model(&self, _task: &Task) -> String {
        self.model.clone()
    }
}

/// Math problems: the math template, and a strong model only when the
/// prompt asks for an explanation or is long.
pub struct MathBehavior {
    strong_model: String,
    fast_model: String,
}

impl MathBehavior {
    pub fn new(strong_model: impl Into<String>, fast_model: impl Into<String>) -> Self {
        Self {
            strong_model: strong_model.into(),
            fast_model: fast_model.into(),
        }
    }
}

#[async_trait]
impl AgentBehavior for MathBehavior {
    fn name(&self) -> &str {
        "math"
    }

    async fn create_plan(
        &self,
        generator: &PlanGenerator,
        task: &Task,
        context: &AgentContext,
    ) -> Plan {
        match generator.plan_from_template(MATH_PROBLEM, task).await {
            Some(plan) => plan,
            None => generator.create_plan(task, context).await,
        }
    }

    fn select_model(&self, task: &Task) -> String {
        if wants_explanation(&task.payload_text()) {
            self.strong_model.clone()
        } else {
            self.fast_model.clone()
        }
    }
}

/// Behaviors keyed by task type.
#[derive(Clone)]
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn AgentBehavior>>,
    default: Arc<dyn AgentBehavior>,
}

impl BehaviorRegistry {
    pub fn new(default: Arc<dyn AgentBehavior>) -> Self {
        Self {
            behaviors: HashMap::new(),
            default,
        }
    }

    /// General behavior by default, math behavior for `math` and `math-problem`.
    pub fn from_config(config: &Config) -> Self {
        let math: Arc<dyn AgentBehavior> = Arc::new(MathBehavior::new(
            config.default_model.clone(),
            config.fast_model.clone(),
        ));
        let mut registry = Self::new(Arc::new(GeneralBehavior::new(config.default_model.clone())));
        registry.register("math", math.clone());
        registry.register(MATH_PROBLEM, math);
        registry
    }

    pub fn register(&mut self, task_type: impl Into<String>, behavior: Arc<dyn AgentBehavior>) {
        self.behaviors.insert(task_type.into(), behavior);
    }

    /// Behavior for `task_type`, falling back to the default.
    pub fn resolve(&self, task_type: &str) -> Arc<dyn AgentBehavior> {
        self.behaviors
            .get(task_type)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}
