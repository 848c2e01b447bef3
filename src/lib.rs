//! # Agent Scheduler
//!
//! Bounded-concurrency scheduler that turns tasks into multi-step plans and
//! executes them.
//!
//! This library provides:
//! - A task scheduler with a bounded worker pool and a bounded queue
//! - A plan generator (templates, LLM completion service, fallback plan)
//! - A plan executor with dependency ordering, retries and failure propagation
//!
//! ## Architecture
//!
//! ```text
//!   submit(task) ──▶ TaskScheduler ──▶ AgentRunner (≤ max_concurrency)
//!                                          │
//!                    ┌─────────────────────┼──────────────────────┐
//!                    ▼                     ▼                      ▼
//!             ContextGatherer        PlanGenerator           PlanExecutor
//!                                 (template / LLM /        (order, retry,
//!                                      fallback)             skip, resume)
//! ```
//!
//! ## Task Flow
//! 1. Queue the task and register a pending agent
//! 2. Gather context, create and optimize a plan
//! 3. Execute the plan step by step
//! 4. Record the final status, plan and timings on the agent
//!
//! ## Modules
//! - `scheduler`: queue, dispatch, agent registry, analytics
//! - `agents`: per-task lifecycle and behaviors
//! - `plan`: plans, steps, generation and execution
//! - `llm`: chat-completion client used by LLM-backed collaborators
//! - `task`: task definitions

pub mod agents;
pub mod config;
pub mod llm;
pub mod plan;
pub mod scheduler;
pub mod task;
pub mod util;

use std::path::Path;

use anyhow::Context;

pub use agents::{AgentSnapshot, AgentStatus};
pub use config::Config;
pub use plan::{Plan, PlanExecutor, PlanGenerator, PlanStatus, Step, StepStatus};
pub use scheduler::{SchedulerAnalytics, SchedulerComponents, SubmitError, TaskScheduler};
pub use task::{Priority, Task};

/// Load a batch of tasks from a JSON or YAML file (by extension).
///
/// The file holds a list of tasks. Every task is validated.
pub async fn load_tasks(path: impl AsRef<Path>) -> anyhow::Result<Vec<Task>> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read task file {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let tasks: Vec<Task> = if is_yaml {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Invalid YAML task file {}", path.display()))?
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON task file {}", path.display()))?
    };

    for task in &tasks {
        task.validate()
            .with_context(|| format!("Invalid task in {}", path.display()))?;
    }
    Ok(tasks)
}
