//! Serve command - runs the sync scheduler and the HTTP server.

use permsync::{Config, server};
use tokio::signal::unix::{SignalKind, signal};

use crate::cli::ServeArgs;

/// Run the permsync server
pub async fn run(args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&args.config)?;
    if config.dry_run {
        tracing::warn!("Dry run enabled: plans are logged but never applied");
    }

    let scheduler = config.scheduler().await?;
    let handle = scheduler.start();
    let app = server::router(scheduler);

    // Bind server
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        address = %local_addr,
        rules = config.rules.len(),
        interval_secs = config.sync.interval_secs,
        "permsync server started"
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...")
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown...")
                }
            }
        })
        .await?;

    handle.shutdown().await?;
    tracing::info!("Server shut down");
    Ok(())
}
