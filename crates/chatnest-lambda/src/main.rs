use std::sync::Arc;

use lambda_http::{run, Error};
use tracing::info;

use chatnest_core::config;
use chatnest_core::service::http::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chatnest_core=info".parse()?),
        )
        .with_ansi(false)
        .init();

    info!("chatnest Lambda starting...");

    // No config file on Lambda; everything comes from CHATNEST_CONFIG and env vars.
    let cfg = config::load_config_from_env(None);
    info!("Backend: {}, completion model: {}", cfg.backend, cfg.completion.model);

    let state = Arc::new(AppState::from_config(cfg)?);
    let router = create_router(state);

    run(router).await?;

    Ok(())
}
