mod face;

use agentic_rpa::{AgentConfig, TaskOrchestrator, init_logging};
use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_logging();

    let config = AgentConfig::from_env().context("loading configuration")?;
    info!(
        max_concurrent_runs = config.max_concurrent_runs,
        trace_path = %config.trace_path.display(),
        "starting web automation API"
    );

    let state = face::AppState {
        orchestrator: Arc::new(TaskOrchestrator::from_config(&config)),
        permits: Arc::new(Semaphore::new(config.max_concurrent_runs)),
        default_headless: config.headless,
    };
    face::serve(state, &config.bind_addr).await
}
