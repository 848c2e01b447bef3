//! Configuration management for the agent scheduler.
//!
//! Configuration can be set via environment variables:
//! - `MAX_CONCURRENCY` - Optional. Number of agents allowed to run at once. Defaults to `4`.
//! - `MAX_QUEUE_DEPTH` - Optional. Tasks allowed to wait for a slot. Defaults to `1024`, `0` = unbounded.
//! - `DEFAULT_MODEL` - Optional. Model used for capable/explanatory work. Defaults to `openai/gpt-4o`.
//! - `FAST_MODEL` - Optional. Cheaper model for simple tasks. Defaults to `openai/gpt-4o-mini`.
//! - `PLANNER_MODEL` - Optional. Model asked to generate plans. Defaults to `DEFAULT_MODEL`.
//! - `OPENROUTER_API_KEY` - Optional. Enables LLM-backed planning and step execution.
//! - `DEFAULT_MAX_RETRIES` - Optional. Retry budget for generated steps. Defaults to `3`.
//! - `RETRY_BACKOFF_MS` - Optional. Base delay between step retries. Defaults to `0`.
//! - `ADAPT_ON_FAILURE` - Optional. Ask the planner to repair a failed plan once. Defaults to `false`.
//! - `SIMULATED_FAILURE_RATE` - Optional. Failure probability of the offline step action. Defaults to `0.1`.
//! - `OPENROUTER_ENDPOINT` - Optional. OpenAI-compatible completions URL. Defaults to OpenRouter.
//! - `LLM_MAX_RETRIES` - Optional. Retries of transient LLM failures. Defaults to `3`, `0` disables.
//! - `MCP_SERVERS` - Optional. Comma-separated MCP server names listed in agent context.

use thiserror::Error;

use crate::util::{env_var_bool, env_var_parse, parse_list};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of agents executing at the same time
    pub max_concurrency: usize,

    /// Maximum number of queued tasks (`None` = unbounded)
    pub max_queue_depth: Option<usize>,

    /// Model for capable/explanatory work
    pub default_model: String,

    /// Model for short, simple tasks
    pub fast_model: String,

    /// Model used by the completion service when generating plans
    pub planner_model: String,

    /// OpenRouter API key (LLM-backed collaborators are disabled without it)
    pub api_key: Option<String>,

    /// Retry budget assigned to generated and fallback steps
    pub default_max_retries: u32,

    /// Base delay between retries of a failed step, in milliseconds
    pub retry_backoff_ms: u64,

    /// Whether a failed plan is sent back to the planner for one repair pass
    pub adapt_on_failure: bool,

    /// Failure probability of the simulated step action
    pub simulated_failure_rate: f64,

    /// Chat completions URL override (`None` = OpenRouter)
    pub llm_endpoint: Option<String>,

    /// Retries of transient LLM request failures
    pub llm_max_retries: u32,

    /// MCP servers listed in the gathered agent context
    pub mcp_servers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_queue_depth: Some(1024),
            default_model: "openai/gpt-4o".to_string(),
            fast_model: "openai/gpt-4o-mini".to_string(),
            planner_model: "openai/gpt-4o".to_string(),
            api_key: None,
            default_max_retries: 3,
            retry_backoff_ms: 0,
            adapt_on_failure: false,
            simulated_failure_rate: 0.1,
            llm_endpoint: None,
            llm_max_retries: 3,
            mcp_servers: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable cannot be parsed
    /// or `MAX_CONCURRENCY` is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_concurrency: usize = env_var_parse("MAX_CONCURRENCY", defaults.max_concurrency)
            .map_err(|e| ConfigError::InvalidValue("MAX_CONCURRENCY".to_string(), e))?;
        if max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let queue_depth: usize = env_var_parse("MAX_QUEUE_DEPTH", 1024)
            .map_err(|e| ConfigError::InvalidValue("MAX_QUEUE_DEPTH".to_string(), e))?;
        let max_queue_depth = (queue_depth > 0).then_some(queue_depth);

        let default_model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| defaults.default_model.clone());
        let fast_model = std::env::var("FAST_MODEL").unwrap_or(defaults.fast_model);
        let planner_model =
            std::env::var("PLANNER_MODEL").unwrap_or_else(|_| default_model.clone());

        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let default_max_retries =
            env_var_parse("DEFAULT_MAX_RETRIES", defaults.default_max_retries)
                .map_err(|e| ConfigError::InvalidValue("DEFAULT_MAX_RETRIES".to_string(), e))?;

        let retry_backoff_ms = env_var_parse("RETRY_BACKOFF_MS", defaults.retry_backoff_ms)
            .map_err(|e| ConfigError::InvalidValue("RETRY_BACKOFF_MS".to_string(), e))?;

        let simulated_failure_rate: f64 =
            env_var_parse("SIMULATED_FAILURE_RATE", defaults.simulated_failure_rate).map_err(
                |e| ConfigError::InvalidValue("SIMULATED_FAILURE_RATE".to_string(), e),
            )?;

        let llm_endpoint = std::env::var("OPENROUTER_ENDPOINT")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let llm_max_retries = env_var_parse("LLM_MAX_RETRIES", defaults.llm_max_retries)
            .map_err(|e| ConfigError::InvalidValue("LLM_MAX_RETRIES".to_string(), e))?;

        let mcp_servers = std::env::var("MCP_SERVERS")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            max_concurrency,
            max_queue_depth,
            default_model,
            fast_model,
            planner_model,
            api_key,
            default_max_retries,
            retry_backoff_ms,
            adapt_on_failure: env_var_bool("ADAPT_ON_FAILURE", false),
            simulated_failure_rate: simulated_failure_rate.clamp(0.0, 1.0),
            llm_endpoint,
            llm_max_retries,
            mcp_servers,
        })
    }

    /// Create a config with custom concurrency limits (useful for testing).
    pub fn new(max_concurrency: usize, max_queue_depth: Option<usize>) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            max_queue_depth,
            ..Self::default()
        }
    }

    /// Whether LLM-backed collaborators can be constructed.
    pub fn has_llm(&self) -> bool {
        self.api_key.is_some()
    }
}
