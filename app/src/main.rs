mod api;
mod config;
mod logging;
mod services;

use std::sync::Arc;

use color_eyre::Result;
use database_adapter::{LedgerStore, PostgresLedger};
use domain::{Celesta, EngineConfig};
use quote_adapter::{FixedQuoteProvider, MarketQuoteProvider, QuoteProvider};

use crate::api::auth::JwtKeys;
use crate::config::{AppConfig, QuoteSource};
use crate::services::CelestaHandle;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    // Initialize logging
    logging::init()?;
    tracing::info!("Starting Celesta application");

    let config = AppConfig::from_env()?;

    let quotes: Arc<dyn QuoteProvider> = match config.quote_source {
        QuoteSource::Market => Arc::new(MarketQuoteProvider::new(config.quote_timeout)?),
        QuoteSource::Fixed => {
            tracing::info!("Using the fixed demo price table");
            Arc::new(FixedQuoteProvider::with_demo_prices())
        }
    };

    let engine_config = EngineConfig::default().with_quote_timeout(config.quote_timeout);
    let celesta = match &config.database_url {
        Some(url) => {
            let ledger = PostgresLedger::connect(url).await?;
            tracing::info!("Using the Postgres ledger");
            Celesta::new(Arc::new(ledger) as Arc<dyn LedgerStore>, quotes, engine_config)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using an in-memory ledger");
            let celesta = Celesta::in_memory(quotes, engine_config);
            if config.quote_source == QuoteSource::Fixed {
                celesta.debug_populate().await?;
            }
            celesta
        }
    };
    tracing::debug!("Celesta initialized: {celesta:#?}");

    let scheduler =
        celesta.start_snapshot_scheduler(config.snapshot_interval, config.snapshot_retention);

    let state = CelestaHandle::new(celesta, JwtKeys::new(&config.jwt_secret));
    let app = api::create_api(state, &config.cors_origins);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server running on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    tracing::info!("Celesta shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
