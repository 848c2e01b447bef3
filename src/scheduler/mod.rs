//! Task scheduler - bounded-concurrency dispatch of tasks to agents.
//!
//! # Dispatch Algorithm
//! ```text
//! submit(task):
//!   reject if the id is queued or running, or the queue is full
//!   enqueue, register the agent as pending, dispatch
//!
//! dispatch:
//!   while running < max_concurrency and the queue is non-empty:
//!     pop, running += 1, spawn the agent run
//!   on agent exit: running -= 1, dispatch again
//! ```
//!
//! Queue, running counter and in-flight ids live behind one mutex, so the
//! check-and-increment in `dispatch` is atomic. The lock is never held
//! across an await.

mod analytics;
mod queue;
pub mod registry;

pub use analytics::SchedulerAnalytics;
pub use queue::TaskQueue;
pub use registry::AgentRegistry;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;

use crate::agents::{
    AgentError, AgentRunner, AgentSnapshot, AgentStatus, BehaviorRegistry, ContextGatherer,
    DefaultContextGatherer,
};
use crate::config::Config;
use crate::llm::{LlmClient, OpenRouterClient, RetryPolicy};
use crate::plan::{
    CalculatorStepAction, LlmPlanCompletion, LlmStepAction, PlanExecutor, PlanGenerator,
    SimulatedStepAction, StepAction,
};
use crate::task::{Task, TaskError};

/// Reasons a submission is refused.
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    #[error("Task queue is full ({capacity} tasks waiting)")]
    QueueFull { capacity: usize },

    #[error("Task {0} is already queued or running")]
    DuplicateTask(String),

    #[error("Invalid task: {0}")]
    InvalidTask(#[from] TaskError),
}

/// Collaborators injected into a scheduler.
pub struct SchedulerComponents {
    pub generator: PlanGenerator,
    pub executor: PlanExecutor,
    pub gatherer: Arc<dyn ContextGatherer>,
    pub behaviors: BehaviorRegistry,
}

impl SchedulerComponents {
    /// Default wiring for `config`.
    ///
    /// With an API key, planning and step execution go through OpenRouter;
    /// otherwise templates, the fallback plan and the simulated step action
    /// are used. Steps that use the calculator tool are evaluated locally
    /// either way.
    pub fn from_config(config: &Config) -> Self {
        let mut generator = PlanGenerator::new().with_max_retries(config.default_max_retries);

        let action: Arc<dyn StepAction> = match &config.api_key {
            Some(api_key) => {
                let retry = match config.llm_max_retries {
                    0 => RetryPolicy::none(),
                    max_retries => RetryPolicy {
                        max_retries,
                        ..RetryPolicy::default()
                    },
                };
                let mut client = OpenRouterClient::new(api_key.clone()).with_retry_policy(retry);
                if let Some(endpoint) = &config.llm_endpoint {
                    client = client.with_endpoint(endpoint.clone());
                }
                let llm: Arc<dyn LlmClient> = Arc::new(client);
                generator = generator.with_completion(Arc::new(LlmPlanCompletion::new(
                    llm.clone(),
                    config.planner_model.clone(),
                )));
                Arc::new(LlmStepAction::new(llm))
            }
            None => Arc::new(SimulatedStepAction::new(config.simulated_failure_rate)),
        };

        let executor = PlanExecutor::new(Arc::new(CalculatorStepAction::new(action)))
            .with_retry_backoff(Duration::from_millis(config.retry_backoff_ms));

        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        Self {
            generator,
            executor,
            gatherer: Arc::new(
                DefaultContextGatherer::new(working_dir)
                    .with_mcp_servers(config.mcp_servers.clone()),
            ),
            behaviors: BehaviorRegistry::from_config(config),
        }
    }
}

struct DispatchState {
    queue: TaskQueue,
    running: usize,
    /// Ids that are queued or running
    in_flight: HashSet<String>,
}

struct Inner {
    max_concurrency: usize,
    state: Mutex<DispatchState>,
    registry: Arc<AgentRegistry>,
    runner: AgentRunner,
    generator: Arc<PlanGenerator>,
    executor: Arc<PlanExecutor>,
    idle: Notify,
}

/// Bounded-concurrency task scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    pub fn new(config: &Config, components: SchedulerComponents) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let generator = Arc::new(components.generator);
        let executor = Arc::new(components.executor);

        let runner = AgentRunner::new(
            generator.clone(),
            executor.clone(),
            components.gatherer,
            components.behaviors,
            registry.clone(),
        )
        .with_adapt_on_failure(config.adapt_on_failure);

        tracing::info!(
            "Scheduler ready: max_concurrency={}, max_queue_depth={:?}",
            config.max_concurrency,
            config.max_queue_depth
        );

        Self {
            inner: Arc::new(Inner {
                max_concurrency: config.max_concurrency.max(1),
                state: Mutex::new(DispatchState {
                    queue: TaskQueue::new(config.max_queue_depth),
                    running: 0,
                    in_flight: HashSet::new(),
                }),
                registry,
                runner,
                generator,
                executor,
                idle: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DispatchState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `task` and start it as soon as a slot is free.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Rejects invalid tasks, ids that are already queued or running, and
    /// submissions while the queue is full. Re-submitting the id of a
    /// finished agent replaces that agent.
    pub fn submit(&self, task: Task) -> Result<(), SubmitError> {
        task.validate()?;

        {
            let mut state = self.state();
            if state.in_flight.contains(&task.id) {
                tracing::warn!("Rejected duplicate task {}", task.id);
                return Err(SubmitError::DuplicateTask(task.id));
            }

            let behavior = self.inner.runner.behaviors().resolve(&task.task_type);
            let pending = AgentSnapshot::pending(task.clone(), behavior.name());
            let id = task.id.clone();

            if let Err(e) = state.queue.push(task) {
                tracing::warn!("Rejected task {}: {}", id, e);
                return Err(e);
            }
            state.in_flight.insert(id.clone());
            self.inner.registry.insert(pending);
            tracing::debug!("Queued task {} ({} waiting)", id, state.queue.len());
        }

        self.dispatch();
        Ok(())
    }

    fn dispatch(&self) {
        loop {
            let task = {
                let mut state = self.state();
                if state.running >= self.inner.max_concurrency {
                    return;
                }
                let Some(task) = state.queue.pop() else {
                    return;
                };
                state.running += 1;
                task
            };

            let scheduler = self.clone();
            tokio::spawn(async move {
                let id = task.id.clone();
                let inner = scheduler.inner.clone();
                let run = tokio::spawn(async move { inner.runner.run(task).await });

                if let Err(e) = run.await {
                    let error = AgentError::Internal(format!("agent task aborted: {}", e));
                    tracing::error!("Task {}: {}", id, error);
                    scheduler.inner.registry.update(&id, |agent| {
                        agent.finish(AgentStatus::Failed, Some(error.to_string()))
                    });
                }

                scheduler.release(&id);
            });
        }
    }

    fn release(&self, id: &str) {
        let idle = {
            let mut state = self.state();
            state.running = state.running.saturating_sub(1);
            state.in_flight.remove(id);
            state.running == 0 && state.queue.is_empty()
        };
        if idle {
            self.inner.idle.notify_waiters();
        }
        self.dispatch();
    }

    /// Current status of agent `id`, `None` if never submitted.
    pub fn get_status(&self, id: &str) -> Option<AgentStatus> {
        self.inner.registry.status(id)
    }

    /// Full snapshot of agent `id`.
    pub fn get_agent(&self, id: &str) -> Option<AgentSnapshot> {
        self.inner.registry.get(id)
    }

    /// Forget a finished agent. Queued or running agents are kept.
    pub fn remove_agent(&self, id: &str) -> Option<AgentSnapshot> {
        if self.state().in_flight.contains(id) {
            return None;
        }
        self.inner.registry.remove(id)
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn running_count(&self) -> usize {
        self.state().running
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state();
        state.running == 0 && state.queue.is_empty()
    }

    /// Resolve once nothing is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Summary over the agents `ids`, or over every agent.
    pub fn analytics(&self, ids: Option<&[String]>) -> SchedulerAnalytics {
        SchedulerAnalytics::from_agents(&self.inner.registry.snapshots(ids))
    }

    pub fn generator(&self) -> &PlanGenerator {
        &self.inner.generator
    }

    pub fn executor(&self) -> &PlanExecutor {
        &self.inner.executor
    }
}
