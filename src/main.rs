// src/main.rs
use station_stowage::api;
use station_stowage::config::AppConfig;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // .env may set RUST_LOG, so it is read before the subscriber is installed.
    let dotenv_result = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = dotenv_result {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            warn!("⚠️ Could not load .env: {}", err);
        }
    }

    let AppConfig {
        api: api_config,
        placement,
        station,
    } = AppConfig::from_env();

    info!("🚀 Stowage service starting...");
    if let Err(err) = api::start_api_server(api_config, placement, station).await {
        error!("❌ Stowage service stopped: {}", err);
        std::process::exit(1);
    }
}
