//! vigil-ai - batch analysis orchestrator
//!
//! Exit status is non-zero only for fatal conditions (bad configuration,
//! store unavailable). Items that fail inference are reported, not fatal.

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vigil_ai::cli::{dispatch, Cli, Context};
use vigil_ai::config::VigilConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config first so its [logging] level can apply; RUST_LOG still wins.
    let (config, config_path) = match VigilConfig::load(cli.config.as_deref()) {
        Ok(loaded) => {
            init_tracing(&loaded.0.logging.level);
            loaded
        }
        Err(e) => {
            init_tracing("info");
            return Err(e).context("Failed to load configuration");
        }
    };

    let config_source = config_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".to_string());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("VIGIL_GIT_HASH"),
        profile = env!("VIGIL_BUILD_PROFILE"),
        config = %config_source,
        "Starting vigil-ai"
    );

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing without dispatching further items");
            ctrl_c_token.cancel();
        }
    });

    let ctx = Context::open(config, config_path.as_deref(), cancel)
        .await
        .context("Failed to open work item store")?;

    dispatch(cli.command, &ctx, cli.json).await?;

    ctx.pool.close().await;
    Ok(())
}

fn init_tracing(config_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
