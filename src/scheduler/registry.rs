//! Agent registry - the id -> agent map owned by one scheduler.
//!
//! Every access holds the lock for a map operation only; nothing awaits
//! while holding it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::agents::{AgentSnapshot, AgentStatus};

#[derive(Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<String, AgentSnapshot>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AgentSnapshot>> {
        self.agents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the agent stored under its id.
    pub fn insert(&self, agent: AgentSnapshot) {
        self.lock().insert(agent.id.clone(), agent);
    }

    /// Apply `f` to the agent `id`. Returns `false` if it is unknown.
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut AgentSnapshot),
    {
        match self.lock().get_mut(id) {
            Some(agent) => {
                f(agent);
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: &str) -> Option<AgentStatus> {
        self.lock().get(id).map(|a| a.status)
    }

    pub fn get(&self, id: &str) -> Option<AgentSnapshot> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<AgentSnapshot> {
        self.lock().remove(id)
    }

    /// Snapshots of `ids` (unknown ids are skipped), or of every agent.
    pub fn snapshots(&self, ids: Option<&[String]>) -> Vec<AgentSnapshot> {
        let agents = self.lock();
        match ids {
            Some(ids) => ids.iter().filter_map(|id| agents.get(id).cloned()).collect(),
            None => agents.values().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
