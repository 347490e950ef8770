//! Binary entrypoint for the Intake API server.
use anyhow::Context;
use intake_api::{run, AppState, DEFAULT_ADDR};
use intake_pipeline::{IntakeConfig, Pipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,intake=debug".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = IntakeConfig::load(None).context("failed to load configuration")?;
    let pipeline = Pipeline::from_config(&config)
        .await
        .context("failed to assemble pipeline")?;
    let state = AppState::new(pipeline).context("failed to register metrics")?;

    // Default listen address can be overridden with INTAKE_ADDR
    let addr = std::env::var("INTAKE_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    run(&addr, state).await.with_context(|| format!("server on {} failed", addr))
}
