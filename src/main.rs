use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use chatnest_core::config::{self, Backend, Config};

#[derive(Parser)]
#[command(
    name = "chatnest",
    about = "chatnest - email/password auth and AI chat API",
    version = chatnest_core::VERSION,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Backend: supabase or memory
        #[arg(long)]
        backend: Option<Backend>,
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show the effective configuration with secrets masked
    Status {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a default config file
    Init {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chatnest=info".parse()?)
                .add_directive("chatnest_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            backend,
            config,
        } => cmd_serve(host, port, backend, config).await?,
        Commands::Status { config } => cmd_status(config)?,
        Commands::Init { config, force } => cmd_init(config, force)?,
    }

    Ok(())
}

// ====== Commands ======

#[cfg(feature = "http-api")]
async fn cmd_serve(
    host: Option<String>,
    port: Option<u16>,
    backend: Option<Backend>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    use chatnest_core::service::http::{serve, AppState};

    let mut cfg = config::load_config_from_env(config_path.as_deref());
    if let Some(host) = host {
        cfg.gateway.host = host;
    }
    if let Some(port) = port {
        cfg.gateway.port = port;
    }
    if let Some(backend) = backend {
        cfg.backend = backend;
    }

    let addr = format!("{}:{}", cfg.gateway.host, cfg.gateway.port);
    info!("Starting chatnest {} ({} backend)", chatnest_core::VERSION, cfg.backend);
    let state = AppState::from_config(cfg).context("failed to initialise services")?;
    serve(&addr, Arc::new(state)).await
}

#[cfg(not(feature = "http-api"))]
async fn cmd_serve(
    _host: Option<String>,
    _port: Option<u16>,
    _backend: Option<Backend>,
    _config_path: Option<PathBuf>,
) -> Result<()> {
    anyhow::bail!("HTTP API not available. Rebuild with: cargo build --features http-api")
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.clone().unwrap_or_else(config::get_config_path);
    let cfg = config::load_config_from_env(config_path.as_deref());

    println!("chatnest {}\n", chatnest_core::VERSION);
    println!(
        "Config: {} {}",
        path.display(),
        if path.exists() { "✓" } else { "✗" }
    );
    match cfg.validate() {
        Ok(()) => println!("Validation: ✓"),
        Err(e) => println!("Validation: ✗ {e}"),
    }
    println!(
        "Completion: {}",
        if cfg.completion.api_key.is_empty() {
            "disabled (no API key)".to_string()
        } else {
            format!("{} ✓", cfg.completion.model)
        }
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

fn cmd_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = config_path.unwrap_or_else(config::get_config_path);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    config::save_config(&Config::default(), Some(&path))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
