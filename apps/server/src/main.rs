//! slicedrop upload server entry point.

mod config;

use std::sync::Arc;

use slicedrop_server::UploadServer;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting slicedrop server"
    );

    let path = config::config_path(std::env::args_os().nth(1));
    let config = config::Config::load(&path)?;
    tracing::info!(
        path = %path.display(),
        port = config.port,
        storage = %config.storage_root.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let server = UploadServer::new(config.server_config());

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signal_server.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
