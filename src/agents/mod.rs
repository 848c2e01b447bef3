//! Agents module - one agent per submitted task.
//!
//! # Agent Lifecycle
//! An agent is registered as pending at submission, runs its task through
//! context gathering, planning and plan execution, and ends completed or
//! failed. The agent id is the task id.
//!
//! # Behaviors
//! - **GeneralBehavior**: generator planning order, one configured model
//! - **MathBehavior**: math-problem template, fast or strong model
//!   depending on whether the prompt asks for an explanation

mod behavior;
mod context;
mod runner;
mod types;

pub use behavior::{AgentBehavior, BehaviorRegistry, GeneralBehavior, MathBehavior};
pub use context::{AgentContext, ContextGatherer, DefaultContextGatherer};
pub use runner::AgentRunner;
pub use types::{AgentError, AgentSnapshot, AgentStatus};
