//! Aggregate statistics over a set of agents.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::agents::{AgentSnapshot, AgentStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerAnalytics {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
    /// Over agents that recorded a duration; `None` when there are none
    pub average_duration_ms: Option<f64>,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    /// Selected model -> number of agents that used it
    pub model_usage: BTreeMap<String, usize>,
}

impl SchedulerAnalytics {
    pub fn from_agents(agents: &[AgentSnapshot]) -> Self {
        let mut analytics = Self {
            total_tasks: agents.len(),
            ..Self::default()
        };

        let mut durations = Vec::new();
        for agent in agents {
            match agent.status {
                AgentStatus::Completed => analytics.completed += 1,
                AgentStatus::Failed => analytics.failed += 1,
                AgentStatus::Running => analytics.running += 1,
                AgentStatus::Pending => analytics.pending += 1,
            }
            if let Some(duration) = agent.duration_ms {
                durations.push(duration);
            }
            if let Some(model) = &agent.selected_model {
                *analytics.model_usage.entry(model.clone()).or_insert(0) += 1;
            }
        }

        if !durations.is_empty() {
            let total: u64 = durations.iter().sum();
            analytics.average_duration_ms = Some(total as f64 / durations.len() as f64);
            analytics.min_duration_ms = durations.iter().copied().min();
            analytics.max_duration_ms = durations.iter().copied().max();
        }

        analytics
    }
}
