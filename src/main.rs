// Main entry point - Dependency injection and the console client
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use power_monitor_client::application::monitor_api::HistoryQuery;
use power_monitor_client::domain::prediction::PredictionAlgorithm;
use power_monitor_client::infrastructure::config::{load_client_config, load_client_config_from};
use power_monitor_client::presentation::app_state::AppState;
use power_monitor_client::presentation::console::{
    follow_live, render_collectors, render_history, render_prediction, user_notice, Cli, Command,
    ConsoleDispatcher,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_client_config_from(path)?,
        None => load_client_config()?,
    };
    tracing::info!("Using server {}", config.server.api_base_url());

    let state = AppState::build(config)?;

    match cli.command() {
        Command::Monitor => monitor(&state).await,
        Command::Predict { algorithm } => predict(&state, algorithm).await,
        Command::Logout => {
            state.api.logout().await?;
            println!("logged out");
            Ok(())
        }
    }
}

async fn ensure_logged_in(state: &AppState) -> anyhow::Result<()> {
    if state.tokens.is_logged_in() {
        return Ok(());
    }
    let Some(account) = &state.config.account else {
        bail!("no stored credentials, configure account.username and account.password");
    };
    state
        .api
        .login(&account.username, &account.password)
        .await
        .map_err(|e| anyhow::anyhow!(user_notice(&e)))?;
    Ok(())
}

async fn select_collector(state: &AppState) -> anyhow::Result<String> {
    let collectors = state
        .api
        .collectors()
        .await
        .map_err(|e| anyhow::anyhow!(user_notice(&e)))?;
    print!("{}", render_collectors(&collectors));

    if let Some(id) = &state.config.session.collector_id {
        return Ok(id.clone());
    }
    collectors
        .iter()
        .find(|c| c.is_active)
        .or_else(|| collectors.first())
        .map(|c| c.collector_id.clone())
        .context("no collector available to monitor")
}

async fn predict(state: &AppState, algorithm: PredictionAlgorithm) -> anyhow::Result<()> {
    ensure_logged_in(state).await?;
    let collector_id = select_collector(state).await?;

    match state.api.prediction(&collector_id, algorithm).await {
        Ok(result) => print!("{}", render_prediction(&result)),
        Err(e) => println!("{}", user_notice(&e)),
    }
    Ok(())
}

async fn monitor(state: &AppState) -> anyhow::Result<()> {
    ensure_logged_in(state).await?;
    let collector_id = select_collector(state).await?;

    let today = Utc::now().date_naive();
    match state.history.load(&collector_id, HistoryQuery::for_days(today, today)).await {
        Ok(report) => println!("{}", render_history(&report, state.config.session.price_per_kwh)),
        Err(e) => println!("{}", user_notice(&e)),
    }

    let (dispatcher, mut losses) = ConsoleDispatcher::channel();
    let session = state.start_live_session(Arc::new(dispatcher));

    match state.api.latest(&collector_id).await {
        Ok(Some(sample)) => session.seed(vec![sample])?,
        Ok(None) => {}
        Err(e) => tracing::warn!("Could not load latest reading: {}", e),
    }

    if let Err(e) = session.open(&collector_id).await {
        tracing::warn!("Live connection failed: {}", e);
    }

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };
    let attempts = follow_live(&session, &mut losses, RECONNECT_DELAY, ctrl_c).await;
    tracing::debug!("Stopping live session after {} reconnect attempts", attempts);

    let grace = state.config.session.shutdown_grace();
    if !session.shutdown(grace).await {
        tracing::warn!("Live session was cancelled after {:?}", grace);
    }
    Ok(())
}
