//! agent-scheduler - batch entry point
//!
//! Runs the tasks from the file given as the first argument (JSON or YAML),
//! or a small demo batch, then prints scheduler analytics as JSON.

use agent_scheduler::{
    load_tasks, Config, Priority, SchedulerComponents, Task, TaskScheduler,
};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_scheduler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: max_concurrency={}, planner={}, llm={}",
        config.max_concurrency,
        config.planner_model,
        if config.has_llm() { "openrouter" } else { "offline" }
    );

    let tasks = match std::env::args().nth(1) {
        Some(path) => load_tasks(&path).await?,
        None => demo_tasks()?,
    };

    let scheduler = TaskScheduler::new(&config, SchedulerComponents::from_config(&config));

    let mut ids = Vec::with_capacity(tasks.len());
    for task in tasks {
        let id = task.id.clone();
        match scheduler.submit(task) {
            Ok(()) => ids.push(id),
            Err(e) => warn!("Task {} not submitted: {}", id, e),
        }
    }

    scheduler.wait_idle().await;

    for id in &ids {
        if let Some(agent) = scheduler.get_agent(id) {
            info!(
                "Task {}: {:?} (model {}, {}ms){}",
                id,
                agent.status,
                agent.selected_model.as_deref().unwrap_or("-"),
                agent.duration_ms.unwrap_or(0),
                agent
                    .error
                    .as_deref()
                    .map(|e| format!(" - {}", e))
                    .unwrap_or_default()
            );
        }
    }

    let analytics = scheduler.analytics(Some(&ids));
    println!("{}", serde_json::to_string_pretty(&analytics)?);
    Ok(())
}

fn demo_tasks() -> anyhow::Result<Vec<Task>> {
    let prompts = [
        "What is (12 + 7) * 3?",
        concat!(
            "A taxi charges a $3 base fare plus $2 per mile. ",
            "How much does a 7 mile ride cost? Explain each step."
        ),
    ];

    prompts
        .iter()
        .map(|prompt| {
            let task = Task::new(
                uuid::Uuid::new_v4().to_string(),
                "math",
                json!({ "prompt": prompt }),
            )?;
            Ok(task.with_priority(Priority::Medium))
        })
        .collect()
}
