//! Plans and everything that produces or runs them.
//!
//! - [`generator`]: task -> plan (templates, completion service, fallback)
//! - [`order`]: dependency-respecting execution order
//! - [`executor`]: runs steps with retry and failure propagation
//! - [`action`]: what "running a step" means

pub mod action;
pub mod completion;
pub mod executor;
pub mod generator;
pub mod order;
#[allow(clippy::module_inception)]
pub mod plan;
pub mod step;
pub mod templates;

pub use action::{
    CalculatorStepAction, LlmStepAction, SimulatedStepAction, StepAction, StepContext,
    CALCULATOR_TOOL,
};
pub use completion::{
    CompletionError, GeneratedPlan, GeneratedStep, LlmPlanCompletion, PlanCompletion, PlanPurpose,
    PlanRequest,
};
pub use executor::{ExecutorError, PlanExecutor, StepMetrics};
pub use generator::PlanGenerator;
pub use order::{execution_order, execution_order_ids};
pub use plan::{Plan, PlanStatus};
pub use step::{Step, StepStatus};
pub use templates::{PlanTemplate, TemplateRegistry};
