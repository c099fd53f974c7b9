//! TCP load balancer (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                  TCP BALANCER                     │
//!                    │                                                   │
//!   Client           │  ┌──────────┐   ┌────────────┐   ┌────────────┐  │
//!   ─────────────────┼─▶│   net    │──▶│   proxy    │──▶│ forwarder  │──┼──▶ Backend
//!                    │  │ listener │   │ dispatcher │   │   relay    │  │
//!   ◀────────────────┼──│          │   └─────┬──────┘   └────────────┘◀─┼─── Backend
//!                    │  └──────────┘         │                           │
//!                    │                 ┌─────▼───────┐   ┌────────────┐  │
//!                    │                 │load_balancer│◀──│   health   │──┼──▶ GET /
//!                    │                 │ round robin │   │   prober   │  │
//!                    │                 └─────────────┘   └────────────┘  │
//!                    │                                                   │
//!                    │  config · lifecycle · observability · resilience  │
//!                    └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use tcp_balancer::config::{load_config, validate_config, BalancerConfig, ConfigError};
use tcp_balancer::lifecycle;
use tcp_balancer::observability::logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "tcp-balancer", version, about = "Round-robin TCP load balancer with active health checks")]
struct Cli {
    /// Path to a TOML configuration file. Built-in defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn load(cli: &Cli) -> Result<BalancerConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BalancerConfig::default(),
    };

    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    if cli.check {
        println!(
            "configuration ok: {} backend(s), listening on {}",
            config.backends.len(),
            config.listener.bind_address
        );
        return Ok(());
    }

    init_logging(&config.observability)?;

    tracing::info!("tcp-balancer v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        backends = config.backends.len(),
        health_checks = config.health_check.enabled,
        "Configuration loaded"
    );

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
