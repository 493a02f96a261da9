use color_eyre::Result;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::env_key;

/// Installs the global subscriber. The filter comes from `CELESTA_LOG_LEVEL`,
/// then `RUST_LOG`, then defaults to `info` for the workspace crates.
pub fn init() -> Result<()> {
    let directives = std::env::var(env_key("LOG_LEVEL"))
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .unwrap_or_else(|_| {
            "app=info,domain=info,database_adapter=info,quote_adapter=info,tower_http=info"
                .to_string()
        });
    let env_filter = EnvFilter::try_new(directives)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(ErrorLayer::default())
        .try_init()?;
    Ok(())
}
