use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedpulse::config::Config;
use feedpulse::fetcher::HttpTransport;
use feedpulse::routes::{self, AppState};
use feedpulse::store::Store;
use feedpulse::submit::Aggregator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedpulse=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("FEEDPULSE_CONFIG").unwrap_or_else(|_| "feedpulse.toml".to_string());
    let config = Config::load_or_default(&config_path)?;
    info!(
        poll_interval_ms = config.poll_interval_ms,
        relay = config.relay().unwrap_or("none"),
        "Loaded configuration"
    );

    let transport = Arc::new(HttpTransport::new(config.relay(), config.request_timeout())?);
    let aggregator = Arc::new(Aggregator::new(
        Store::new(),
        transport,
        config.poll_interval(),
    ));

    // Seed feeds go through the same submission path as user input
    for feed in &config.feeds {
        if let Err(e) = aggregator.register(&feed.url).await {
            warn!(url = %feed.url, error = %e, "Failed to register configured feed");
        }
    }
    info!("{} feeds registered", aggregator.store().feeds().len());

    let state = Arc::new(AppState {
        aggregator: aggregator.clone(),
    });
    let app = routes::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
