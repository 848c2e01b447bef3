//! Agent execution context - auxiliary information gathered once per task.
//!
//! The context is opaque to the scheduler: it is gathered before planning,
//! summarised into planning prompts and handed read-only to step actions.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::task::Task;

/// Maximum number of directory entries recorded in the codebase context.
const MAX_CODEBASE_ENTRIES: usize = 50;

/// Environment variables copied into the shell context when set.
const SHELL_ENV_KEYS: &[&str] = &["SHELL", "LANG", "RUST_LOG", "CI"];

/// Auxiliary information available to an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    /// Model Context Protocol servers or resources available to the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<Value>,

    /// Information about the codebase the task operates on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codebase: Option<Value>,

    /// Shell/environment facts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<Value>,
}

impl AgentContext {
    /// An empty context, used when gathering fails.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mcp.is_none() && self.codebase.is_none() && self.shell.is_none()
    }

    /// Compact JSON view used in planning and step prompts.
    pub fn summary(&self) -> Value {
        json!({
            "mcp": self.mcp.clone().unwrap_or_else(|| json!({})),
            "codebase": self.codebase.clone().unwrap_or_else(|| json!({})),
            "shell": self.shell.clone().unwrap_or_else(|| json!({})),
        })
    }
}

/// Collects the context for a task before planning starts.
///
/// # Contract
/// Implementations may return `Err`; the agent runner logs the error and
/// continues with [`AgentContext::empty`] instead of failing the agent.
#[async_trait]
pub trait ContextGatherer: Send + Sync {
    async fn gather(&self, task: &Task) -> anyhow::Result<AgentContext>;
}

/// Gathers codebase and shell context from the local machine.
pub struct DefaultContextGatherer {
    working_dir: PathBuf,
    mcp_servers: Vec<String>,
}

impl DefaultContextGatherer {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            mcp_servers: Vec::new(),
        }
    }

    /// Advertise MCP servers in the gathered context.
    pub fn with_mcp_servers(mut self, servers: Vec<String>) -> Self {
        self.mcp_servers = servers;
        self
    }

    async fn list_files(&self) -> anyhow::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.working_dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            files.push(name);
        }
        files.sort();
        files.truncate(MAX_CODEBASE_ENTRIES);
        Ok(files)
    }

    fn shell_facts(&self) -> Value {
        let env: serde_json::Map<String, Value> = SHELL_ENV_KEYS
            .iter()
            .filter_map(|key| {
                std::env::var(key)
                    .ok()
                    .map(|value| (key.to_string(), Value::String(value)))
            })
            .collect();
        json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "cwd": self.working_dir.to_string_lossy(),
            "env": env,
        })
    }
}

#[async_trait]
impl ContextGatherer for DefaultContextGatherer {
    async fn gather(&self, task: &Task) -> anyhow::Result<AgentContext> {
        let files = self.list_files().await?;

        let mcp = (!self.mcp_servers.is_empty()).then(|| {
            json!({
                "servers": self.mcp_servers,
                "summary": format!("{} MCP server(s) available", self.mcp_servers.len()),
            })
        });

        tracing::debug!(
            "Gathered context for task {}: {} codebase entries",
            task.id,
            files.len()
        );

        Ok(AgentContext {
            mcp,
            codebase: Some(json!({
                "root": self.working_dir.to_string_lossy(),
                "files": files,
            })),
            shell: Some(self.shell_facts()),
        })
    }
}
