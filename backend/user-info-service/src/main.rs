/// User Info Service Main Entry Point
///
/// Starts gRPC server with:
/// - Mutual TLS on the listener (and on the upstream channel in relay mode)
/// - `user.v1.UserService` in terminal or relay mode
/// - gRPC health and reflection services
use anyhow::{anyhow, Context, Result};
use tokio::signal;
use tracing::{error, info};
use user_info_service::{runtime::log_certificate_directory, ServiceRuntime, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23 requires selecting a CryptoProvider at runtime
    if let Err(err) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("Failed to install rustls crypto provider: {:?}", err);
        return Err(anyhow!("Unable to install TLS crypto provider: {:?}", err));
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "user_info_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting User Info Service");

    if let Err(e) = run().await {
        error!("User info service failed to start: {:#}", e);
        return Err(e);
    }

    info!("User info service shutdown complete");

    Ok(())
}

async fn run() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    info!(
        service = %settings.service_name,
        mode = %settings.mode,
        "Configuration loaded"
    );

    log_certificate_directory(&settings.tls.cert_dir);

    let runtime = ServiceRuntime::build(&settings)?;
    runtime.serve(shutdown_signal()).await
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
