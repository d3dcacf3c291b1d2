use std::time::Duration;

use anyhow::Context;
use slic::SlicServerTransport;
use slicd::config::{self, Command, DaemonConfig};
use slicd::{greeting, runtime, telemetry};
use tracing::info;

fn main() -> anyhow::Result<()> {
    let (config, command) = config::load_config()?;
    telemetry::init_logging(&config.logging)?;

    let tokio_runtime =
        runtime::create_runtime(&config.runtime).context("failed to create tokio runtime")?;
    let result = tokio_runtime.block_on(run(config, command));

    tokio_runtime.shutdown_timeout(Duration::from_secs(5));
    result
}

async fn run(config: DaemonConfig, command: Command) -> anyhow::Result<()> {
    let address = config.network.address();
    match command {
        Command::Serve => {
            let listener = SlicServerTransport::new(config.slic.clone())
                .listen(address.as_str())
                .await
                .with_context(|| format!("failed to bind {address}"))?;
            greeting::serve(listener, config.greeting.clone(), shutdown_signal()).await?;
            info!("Shutdown complete");
        }
        Command::Hello { name } => {
            let reply = greeting::hello(
                &address,
                config.slic.clone(),
                &name,
                config.greeting.shutdown_timeout(),
            )
            .await?;
            println!("{reply}");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
