use std::sync::Arc;

use papertrader::application::handlers::router;
use papertrader::application::services::bot_service::BotService;
use papertrader::config::{AppConfig, ConfigError};
use papertrader::domain::entities::bot::BotConfig;
use papertrader::infrastructure::alpaca_client::AlpacaClient;
use papertrader::persistence::init_database;
use papertrader::rate_limit::{create_rate_limiter, RateLimiterConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; the variables may come from the environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "papertrader=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let bot_config = BotConfig::from_env();
    bot_config
        .validate()
        .map_err(ConfigError::InvalidBotConfig)?;

    info!(
        trading_url = %config.alpaca.trading_url,
        database_url = %config.database_url,
        mode = bot_config.mode.as_str(),
        "Starting paper trading server"
    );

    let pool = init_database(&config.database_url).await?;
    let broker = Arc::new(AlpacaClient::new(config.alpaca.clone())?);

    let service = Arc::new(BotService::new(
        broker,
        pool,
        config.asset_cache_ttl,
        bot_config,
    ));

    if service.broker_healthy().await {
        info!("Broker account reachable");
    } else {
        warn!("Broker account not reachable; check credentials before starting the bot");
    }

    let limiter = create_rate_limiter(RateLimiterConfig {
        requests_per_minute: config.api_requests_per_minute,
    });
    let app = router(service.clone(), limiter);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shutting down gracefully...");

    // Close the session so its metrics and stop event are recorded
    if service.status().await.state.is_running {
        if let Err(e) = service.stop().await {
            error!(error = %e, "Failed to stop bot cleanly");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
