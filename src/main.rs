use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tawes_bridge::config::Config;
use tawes_bridge::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Configuration first: it carries the default log level
    let config_path = Config::default_path();
    let config = Config::load(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {}: {}\n\n\
             Make sure:\n\
             1. The file exists (or point TAWES_CONFIG at it)\n\
             2. All ${{VAR}} placeholders have matching environment variables",
            config_path,
            e
        )
    })?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.logging.level).map_err(|e| {
            anyhow::anyhow!("Invalid logging.level '{}': {}", config.logging.level, e)
        })?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("TAWES bridge starting (config: {})", config_path);

    for warning in config.warnings() {
        warn!("{}", warning);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Only a scheduled bridge lives long enough to need signal handling
    if config.scheduler.is_some() {
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });
    }

    let mut scheduler = Scheduler::new(config, shutdown_rx);

    if let Err(e) = scheduler.run().await {
        error!("Bridge failed: {}", e);
        return Err(e.into());
    }

    info!("TAWES bridge finished");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
