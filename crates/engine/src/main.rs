// crates/engine/src/main.rs
//
// One scheduling tick: publish the top-N selection with the current weights,
// optionally record the latest portfolio value, then run the active learner.
//
//   engine [config.toml] [portfolio_value]
use anyhow::Context;
use common::config::{AppConfig, DEFAULT_CONFIG_PATH};
use common::FileStore;
use engine::run_tick;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let portfolio_value = args
        .next()
        .map(|raw| raw.parse::<f64>())
        .transpose()
        .context("portfolio value must be a number")?;

    let config = AppConfig::load(&config_path)?;
    tracing::info!(
        config = %config_path.display(),
        state_dir = %config.storage.state_dir.display(),
        learner = %config.learner.kind,
        "Weight engine starting"
    );

    let files = Arc::new(FileStore::new(&config.storage.state_dir));
    let report = run_tick(&config, files, portfolio_value)?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(e) = report.selection_error.as_ref().or(report.equity_error.as_ref()) {
        anyhow::bail!("tick finished with errors: {}", e);
    }
    Ok(())
}
