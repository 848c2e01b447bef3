//! Execution ordering for plan steps.
//!
//! # Algorithm
//! 1. Stable pre-sort of all steps by priority rank (critical first)
//! 2. Depth-first visit in that order, emitting every dependency before the
//!    step that needs it
//! 3. Re-entering a step that is still on the current DFS path means the
//!    plan contains a cycle
//!
//! Dependencies that name no step in the plan are ignored here; validation
//! reports them and the executor skips the dependent step.
//!
//! # Time Complexity
//! O(V log V + E) where V = number of steps, E = number of dependencies

use std::collections::{HashMap, HashSet};

use super::executor::ExecutorError;
use super::step::Step;

/// Compute the execution order of `steps` as indices into the slice.
///
/// # Errors
/// Returns `ExecutorError::CircularDependency` naming the step at which the
/// cycle was closed.
pub fn execution_order(steps: &[Step]) -> Result<Vec<usize>, ExecutorError> {
    // First occurrence wins for duplicated ids; validation flags the duplicate.
    let mut index_by_id: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for (idx, step) in steps.iter().enumerate() {
        index_by_id.entry(step.id.as_str()).or_insert(idx);
    }

    let mut presorted: Vec<usize> = (0..steps.len()).collect();
    presorted.sort_by_key(|&idx| steps[idx].priority.rank());

    let mut visitor = Visitor {
        steps,
        index_by_id: &index_by_id,
        visiting: HashSet::new(),
        visited: HashSet::new(),
        order: Vec::with_capacity(steps.len()),
    };

    for idx in presorted {
        visitor.visit(idx)?;
    }

    Ok(visitor.order)
}

/// Same as [`execution_order`] but returns step ids.
pub fn execution_order_ids(steps: &[Step]) -> Result<Vec<String>, ExecutorError> {
    Ok(execution_order(steps)?
        .into_iter()
        .map(|idx| steps[idx].id.clone())
        .collect())
}

struct Visitor<'a> {
    steps: &'a [Step],
    index_by_id: &'a HashMap<&'a str, usize>,
    visiting: HashSet<usize>,
    visited: HashSet<usize>,
    order: Vec<usize>,
}

impl Visitor<'_> {
    fn visit(&mut self, idx: usize) -> Result<(), ExecutorError> {
        if self.visited.contains(&idx) {
            return Ok(());
        }
        if !self.visiting.insert(idx) {
            return Err(ExecutorError::CircularDependency {
                step_id: self.steps[idx].id.clone(),
            });
        }

        let steps = self.steps;
        for dep in &steps[idx].dependencies {
            if let Some(&dep_idx) = self.index_by_id.get(dep.as_str()) {
                self.visit(dep_idx)?;
            }
        }

        self.visiting.remove(&idx);
        self.visited.insert(idx);
        self.order.push(idx);
        Ok(())
    }
}
