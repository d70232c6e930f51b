use std::env;
use std::sync::Arc;
use eyre::WrapErr;
use tracing::{info, instrument, warn};

use strategy_client::config::Config;
use strategy_client::execution::ExecutionTracker;
use strategy_client::gateway::{ApiGateway, FileTokenStore};
use strategy_client::logging;
use strategy_client::strategy::StrategyRepository;

const MAX_POLLS: usize = 120;

#[instrument(name = "strategy_console_main")]
#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Load configuration (reads .env as well)
    let cfg = Config::load()?;

    // Initialize logging
    if let Err(e) = logging::init_logging(env!("CARGO_BIN_NAME").to_string()) {
        eprintln!("Failed to initialize logging: {}", e);
        return Err(e);
    }
    info!(base_url = %cfg.api_base_url, "Configuration loaded and logging initialized");

    let store = Arc::new(FileTokenStore::new(cfg.token_store_path.clone()));
    let gateway = ApiGateway::new(&cfg, store)?;

    // Reuse the persisted session, otherwise sign in with env credentials
    if !gateway.restore().await? {
        let email = env::var("STRATEGY_API_EMAIL").wrap_err("No saved session and STRATEGY_API_EMAIL is not set")?;
        let password = env::var("STRATEGY_API_PASSWORD").wrap_err("STRATEGY_API_PASSWORD is not set")?;
        gateway.login(&email, &password).await?;
    }

    let repository = Arc::new(StrategyRepository::new(gateway.clone()));
    let tracker = ExecutionTracker::new(repository.clone());

    let templates = repository.list_templates(None).await?;
    info!(count = templates.len(), "Templates loaded");
    for template in &templates {
        println!(
            "template  {:<38} {:<16} {}{}",
            template.id,
            template.strategy_type.label(),
            template.name,
            if template.is_system { " (system)" } else { "" }
        );
    }

    let strategies = repository.list_strategies(None).await?;
    info!(count = strategies.len(), "Strategies loaded");
    for strategy in &strategies {
        println!(
            "strategy  {:<38} {:<16} {} [{} sources, {}]",
            strategy.id,
            strategy.strategy_type.label(),
            strategy.name,
            strategy.data_sources.len(),
            if strategy.is_active { "active" } else { "inactive" }
        );
    }

    match tracker.list_executions(None).await {
        Ok(executions) => {
            for execution in &executions {
                println!(
                    "execution {:<38} {:<10} strategy {}",
                    execution.id, execution.status, execution.strategy_id
                );
            }
        }
        Err(e) => warn!(error = %e, "Failed to load executions"),
    }

    // Optionally run one strategy and follow it to completion
    if let Ok(strategy_id) = env::var("STRATEGY_CONSOLE_EXECUTE") {
        let execution = tracker.execute(&strategy_id, serde_json::json!({})).await?;
        let finished = tracker
            .wait_for_completion(&execution.id, cfg.execution_poll_interval, MAX_POLLS)
            .await?;
        println!("execution {} finished as {}", finished.id, finished.status);
        if let Some(message) = &finished.error_message {
            println!("  error: {message}");
        }
    }

    Ok(())
}
