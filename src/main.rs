use agentic_rpa::config::parse_flag;
use agentic_rpa::{AgentConfig, TaskOrchestrator, init_logging};
use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;

/// Search a store for a product and report the first (or best) result.
#[derive(Parser, Debug)]
#[command(name = "agentic-rpa", version)]
struct Cli {
    /// Product keyword or natural-language goal.
    #[arg(long, default_value = "laptop")]
    product: String,

    /// true or false; overrides the HEADLESS setting from .env.
    #[arg(long)]
    headless: Option<String>,

    /// Let the model plan the steps instead of running the fixed search.
    #[arg(long)]
    planned: bool,

    /// Print the full result (trace included) as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = AgentConfig::from_env().context("loading configuration")?;
    let headless = cli
        .headless
        .as_deref()
        .map(parse_flag)
        .unwrap_or(config.headless);

    eprintln!("Starting search for '{}'...", cli.product);
    let orchestrator = TaskOrchestrator::from_config(&config);
    let result = if cli.planned {
        orchestrator.run_planned_task(&cli.product, headless).await
    } else {
        orchestrator.run_fixed_task(&cli.product, headless).await
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.message);
        if let Some(url) = result.data.as_ref().and_then(|d| d.url.as_deref()) {
            println!("Link: {url}");
        }
        let elapsed = result
            .trace
            .finished_at()
            .map(|end| (end - result.trace.started_at()).num_milliseconds())
            .unwrap_or_default();
        eprintln!(
            "{} step(s) in {elapsed}ms, trace at {}",
            result.trace.len(),
            config.trace_path.display()
        );
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
