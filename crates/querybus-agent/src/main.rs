//! querybus agent - serves query subscriptions for one host.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use querybus_agent::{Args, Driver, FileTableSource};
use querybus_core::{ConnectionManager, ShutdownSignal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "querybus_agent=info,querybus_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        protocol_version = querybus_proto::PROTOCOL_VERSION,
        "starting querybus agent"
    );

    let config = Args::parse().into_config();
    config.validate()?;

    tracing::info!(
        host = %config.connection.host_name,
        topic = %config.connection.base_topic(),
        port = config.connection.port,
        master = ?config.master,
        tables = %config.tables_path.display(),
        "configuration loaded"
    );

    let source = Arc::new(FileTableSource::new(&config.tables_path));
    let manager = ConnectionManager::open(config.connection.clone(), source)?;
    let mut driver = Driver::new(manager, &config);

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        signal.trigger();
    });

    if let Err(e) = driver.run(&shutdown).await {
        tracing::error!(error = %e, "agent error");
        return Err(e.into());
    }

    Ok(())
}
