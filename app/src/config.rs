use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use color_eyre::{Result, eyre::WrapErr};
use tracing::warn;

lazy_static::lazy_static! {
    pub static ref PROJECT_NAME: String = String::from("Celesta").to_uppercase();
}

const DEV_JWT_SECRET: &str = "celesta-dev-secret-change-in-production";

/// Which quote provider backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    /// Live Yahoo Finance and CoinGecko prices
    Market,
    /// Built-in demo price table, no network
    Fixed,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// In-memory ledger when unset
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub quote_timeout: Duration,
    pub quote_source: QuoteSource,
    pub snapshot_interval: Duration,
    pub snapshot_retention: chrono::Duration,
    pub cors_origins: Vec<String>,
}

/// Name of a project-scoped environment variable, e.g. `CELESTA_BIND_ADDR`
pub fn env_key(name: &str) -> String {
    format!("{}_{name}", PROJECT_NAME.as_str())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(env_key(name))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .wrap_err_with(|| format!("invalid value '{raw}' for {}", env_key(name))),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Reads the configuration from the environment, loading `.env` first
    ///
    /// # Errors
    /// Returns an error if a variable is set to an unparsable value
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let jwt_secret = env_var("JWT_SECRET").unwrap_or_else(|| {
            warn!(
                "{} not set, using the development secret",
                env_key("JWT_SECRET")
            );
            DEV_JWT_SECRET.to_string()
        });

        let quote_source = match env_var("QUOTES").as_deref().map(str::trim) {
            Some("fixed") => QuoteSource::Fixed,
            Some("market") | None => QuoteSource::Market,
            Some(other) => {
                warn!("Unknown quote source '{other}', using live market data");
                QuoteSource::Market
            }
        };

        let cors_origins = env_var("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:3001".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            bind_addr: parse_env("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            jwt_secret,
            quote_timeout: Duration::from_secs(parse_env("QUOTE_TIMEOUT_SECS", 10)?),
            quote_source,
            snapshot_interval: Duration::from_secs(parse_env("SNAPSHOT_INTERVAL_SECS", 3600)?),
            snapshot_retention: chrono::Duration::hours(parse_env(
                "SNAPSHOT_RETENTION_HOURS",
                720,
            )?),
            cors_origins,
        })
    }
}
