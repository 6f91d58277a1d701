mod api;
mod config;
mod probe;

use anyhow::Result;
use clap::Parser;
use dbkit::database::ScyllaDriver;
use dbkit::MetricsRegistry;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "failover-probe")]
#[command(about = "Probes a ScyllaDB cluster through the instrumented connection and exports its metrics")]
struct Args {
    #[arg(short, long, default_value = "config/failover-probe.yaml")]
    config: String,

    /// Overrides `observability.metrics_port`.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = config::load_config(&args.config)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "failover_probe={level},dbkit={level},tower_http=debug",
                    level = config.observability.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = args.port.unwrap_or(config.observability.metrics_port);
    info!(
        "Starting failover-probe for '{}' on port {}",
        config.database.alias, port
    );

    let registry = Arc::new(MetricsRegistry::new());
    let prober = Arc::new(probe::Prober::new(
        Arc::new(ScyllaDriver::new()),
        &config,
        registry,
    ));

    let prober_clone = prober.clone();
    let probe_task = tokio::spawn(async move {
        prober_clone.probe_loop().await;
    });

    tokio::select! {
        result = api::start_server(prober.clone(), port) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    probe_task.abort();
    prober.shutdown().await;
    Ok(())
}
