use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use redirect_sentinel::{config::Config, metrics, server::Server};

#[derive(Parser, Debug)]
#[command(name = "redirect-sentinel")]
#[command(about = "Health monitor that fails a site over by toggling a redirect rule")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loaded before logging so the configured level applies from the start
    let config = Config::load(&args.config);

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = config.as_ref().map(|c| c.log_level.as_str()).unwrap_or("info");
            EnvFilter::new(level)
        })
    };

    let registry = tracing_subscriber::registry().with(filter);
    if args.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = match config {
        Ok(config) => {
            info!("Loaded configuration from {:?}", args.config);
            config
        }
        Err(e) => {
            error!("Invalid configuration in {:?}: {:#}", args.config, e);
            std::process::exit(1);
        }
    };

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    if let Some(ref metrics_config) = config.metrics {
        info!("Starting Prometheus metrics server on {}", metrics_config.address);
        if let Err(e) = metrics::start_metrics_server(&metrics_config.address) {
            warn!("Failed to start metrics server: {}. Continuing without metrics.", e);
        }
    }

    info!("Starting redirect-sentinel");

    let server = Server::new(config);
    server.run().await?;

    Ok(())
}
