//! Plan templates for common task shapes.
//!
//! A template is a fixed step skeleton keyed by task type. Instantiating a
//! built-in template also adapts it to the task with keyword heuristics over
//! the payload text; every insertion or removal rewires dependents so the
//! dependency chain stays consistent.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::action::CALCULATOR_TOOL;
use super::plan::Plan;
use super::step::Step;
use crate::task::{Priority, Task};

pub const CODE_GENERATION: &str = "code-generation";
pub const DEBUGGING: &str = "debugging";
pub const MATH_PROBLEM: &str = "math-problem";

/// Prompts longer than this get the full math treatment.
const LONG_PROMPT_CHARS: usize = 100;

/// A named step skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTemplate {
    pub name: String,
    pub title: String,
    pub description: String,
    pub steps: Vec<Step>,
}

impl PlanTemplate {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            description: description.into(),
            steps,
        }
    }

    /// Build a draft plan for `task` from this template.
    pub fn instantiate(&self, task: &Task) -> Plan {
        let mut steps = self.steps.clone();
        adapt_steps(&self.name, &mut steps, &task.payload_text());

        let mut plan = Plan::new(
            Plan::id_for_task(&task.id),
            self.title.clone(),
            self.description.clone(),
            steps,
        );
        plan.estimated_total_duration_ms =
            Some(plan.steps.iter().filter_map(|s| s.estimated_duration_ms).sum());
        plan
    }
}

/// Named template store owned by one plan generator.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, PlanTemplate>,
}

impl TemplateRegistry {
    /// Registry without any templates.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in templates.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.add_template(code_generation_template());
        registry.add_template(debugging_template());
        registry.add_template(math_problem_template());
        registry
    }

    /// Register a template, replacing any template with the same name.
    pub fn add_template(&mut self, template: PlanTemplate) {
        tracing::debug!("Registered plan template {}", template.name);
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get_template(&self, name: &str) -> Option<&PlanTemplate> {
        self.templates.get(name)
    }

    /// Template names, sorted.
    pub fn list_templates(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }
}

fn template_step(
    id: &str,
    title: &str,
    description: &str,
    estimate_ms: u64,
    priority: Priority,
    tool: &str,
    max_retries: u32,
) -> Step {
    Step::new(id, title, description)
        .with_estimate_ms(estimate_ms)
        .with_priority(priority)
        .with_tools([tool])
        .with_max_retries(max_retries)
}

fn code_generation_template() -> PlanTemplate {
    PlanTemplate::new(
        CODE_GENERATION,
        "Code Generation Plan",
        "Standard plan for generating code based on requirements",
        vec![
            template_step(
                "analyze-requirements",
                "Analyze Requirements",
                "Understand and analyze the code generation requirements",
                2000,
                Priority::High,
                "analyzer",
                2,
            ),
            template_step(
                "design-structure",
                "Design Code Structure",
                "Plan the overall code structure and architecture",
                3000,
                Priority::High,
                "designer",
                2,
            )
            .with_dependency("analyze-requirements"),
            template_step(
                "generate-code",
                "Generate Code",
                "Write the actual code implementation",
                5000,
                Priority::Critical,
                "generator",
                3,
            )
            .with_dependency("design-structure"),
            template_step(
                "validate-code",
                "Validate Code",
                "Check code quality, syntax, and requirements compliance",
                2000,
                Priority::Medium,
                "validator",
                2,
            )
            .with_dependency("generate-code"),
        ],
    )
}

fn debugging_template() -> PlanTemplate {
    PlanTemplate::new(
        DEBUGGING,
        "Debugging Plan",
        "Systematic approach to identify and fix issues",
        vec![
            template_step(
                "reproduce-issue",
                "Reproduce Issue",
                "Reproduce the reported issue consistently",
                3000,
                Priority::Critical,
                "reproducer",
                3,
            ),
            template_step(
                "analyze-logs",
                "Analyze Logs",
                "Examine logs and error messages for clues",
                2000,
                Priority::High,
                "log-analyzer",
                2,
            )
            .with_dependency("reproduce-issue"),
            template_step(
                "identify-root-cause",
                "Identify Root Cause",
                "Pinpoint the exact cause of the issue",
                4000,
                Priority::High,
                "analyzer",
                3,
            )
            .with_dependency("analyze-logs"),
            template_step(
                "implement-fix",
                "Implement Fix",
                "Apply the necessary changes to fix the issue",
                3000,
                Priority::Critical,
                "fixer",
                3,
            )
            .with_dependency("identify-root-cause"),
            template_step(
                "verify-fix",
                "Verify Fix",
                "Test that the fix resolves the issue without side effects",
                2000,
                Priority::High,
                "tester",
                2,
            )
            .with_dependency("implement-fix"),
        ],
    )
}

fn math_problem_template() -> PlanTemplate {
    PlanTemplate::new(
        MATH_PROBLEM,
        "Math Problem Solution Plan",
        "Structured approach to solve mathematical problems",
        vec![
            template_step(
                "analyze-problem",
                "Analyze Math Problem",
                "Understand the problem, identify key concepts and required operations",
                2000,
                Priority::High,
                "analyzer",
                2,
            ),
            template_step(
                "select-strategy",
                "Select Solution Strategy",
                "Choose the most appropriate mathematical approach and solution method",
                1500,
                Priority::High,
                "strategy-selector",
                2,
            )
            .with_dependency("analyze-problem"),
            template_step(
                "perform-calculations",
                "Perform Calculations",
                "Execute the mathematical operations and computations",
                3000,
                Priority::Critical,
                CALCULATOR_TOOL,
                3,
            )
            .with_dependency("select-strategy"),
            template_step(
                "generate-explanation",
                "Generate Explanation",
                "Explain the solution process and final answer",
                2000,
                Priority::Medium,
                "explainer",
                2,
            )
            .with_dependency("perform-calculations"),
        ],
    )
}

/// Case-insensitive word match over the payload text.
fn mentions(text: &str, words: &str) -> bool {
    Regex::new(&format!(r"(?i)\b(?:{})\b", words))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Whether a math prompt asks for the worked explanation.
pub fn wants_explanation(prompt: &str) -> bool {
    prompt.to_lowercase().contains("explain") || prompt.chars().count() > LONG_PROMPT_CHARS
}

fn adapt_steps(template: &str, steps: &mut Vec<Step>, text: &str) {
    match template {
        CODE_GENERATION => {
            if mentions(text, "tests?|testing|unit[- ]tests?") {
                insert_after(
                    steps,
                    "generate-code",
                    template_step(
                        "write-tests",
                        "Write Tests",
                        "Write tests covering the generated code",
                        3000,
                        Priority::Medium,
                        "tester",
                        2,
                    ),
                );
            }
            if mentions(text, "prototype|quick|draft") {
                remove_step(steps, "validate-code");
            }
        }
        DEBUGGING => {
            if mentions(text, "intermittent|flaky|sporadic") {
                insert_after(
                    steps,
                    "reproduce-issue",
                    template_step(
                        "add-instrumentation",
                        "Add Instrumentation",
                        "Add logging around the failing path to capture the intermittent failure",
                        2000,
                        Priority::High,
                        "instrumenter",
                        2,
                    ),
                );
            }
            if mentions(text, "regressions?") {
                insert_after(
                    steps,
                    "verify-fix",
                    template_step(
                        "add-regression-test",
                        "Add Regression Test",
                        "Add a test that fails without the fix",
                        2000,
                        Priority::Medium,
                        "tester",
                        2,
                    ),
                );
            }
        }
        MATH_PROBLEM => {
            if !wants_explanation(text) {
                remove_step(steps, "generate-explanation");
            }
        }
        _ => {}
    }
}

/// Insert `step` right after `anchor`: it depends on `anchor`, and every
/// former dependent of `anchor` now depends on it instead.
fn insert_after(steps: &mut Vec<Step>, anchor: &str, mut step: Step) {
    let Some(position) = steps.iter().position(|s| s.id == anchor) else {
        return;
    };
    for other in steps.iter_mut() {
        for dep in other.dependencies.iter_mut() {
            if dep == anchor {
                *dep = step.id.clone();
            }
        }
    }
    step.dependencies = vec![anchor.to_string()];
    steps.insert(position + 1, step);
}

/// Remove `id`; its dependents inherit its dependencies.
fn remove_step(steps: &mut Vec<Step>, id: &str) {
    let Some(position) = steps.iter().position(|s| s.id == id) else {
        return;
    };
    let removed = steps.remove(position);
    for other in steps.iter_mut() {
        if other.dependencies.iter().any(|d| d == id) {
            other.dependencies.retain(|d| d != id);
            for inherited in &removed.dependencies {
                if !other.dependencies.contains(inherited) {
                    other.dependencies.push(inherited.clone());
                }
            }
        }
    }
}
