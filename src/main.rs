use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use workgate::config::{load_config, GatewayConfig};
use workgate::executor::EchoExecutor;
use workgate::http::HttpServer;
use workgate::lifecycle::Shutdown;
use workgate::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "workgate")]
#[command(about = "HTTP gateway bridging requests to a worker-process pool", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("workgate v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_request_size_mb = config.max_request_size,
        internal_error_code = config.internal_error_code,
        access_logs = config.access_logs,
        "configuration loaded"
    );

    // Worker-pool wiring is deployment-specific; the binary ships with the
    // debug echo executor so the gateway can run standalone.
    if !config.debug {
        tracing::warn!("no worker pool wired, falling back to the debug echo executor");
    }
    let executor = Arc::new(EchoExecutor);

    let metrics_handle = metrics::init_metrics()?;

    let shutdown = Shutdown::new();

    if config.observability.metrics_enabled {
        let admin = workgate::rpc::router(executor.clone(), metrics_handle);
        let addr = config.observability.metrics_address.clone();
        let mut admin_shutdown = shutdown.subscribe();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(address = %addr, "admin server starting");
        tokio::spawn(async move {
            let serve = axum::serve(listener, admin).with_graceful_shutdown(async move {
                let _ = admin_shutdown.recv().await;
            });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "admin server failed");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "listening for connections");

    let server = HttpServer::new(config, executor);
    server.run(listener, shutdown.subscribe()).await?;

    shutdown.trigger();
    tracing::info!("shutdown complete");
    Ok(())
}
