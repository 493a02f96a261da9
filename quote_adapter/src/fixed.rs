use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::{
    AssetClass, AssetInfo, HistoryPeriod, PricePoint, Quote, QuoteError, QuoteProvider,
    require_crypto_id,
};

/// In-process quote table. Prices are set by hand, individual tickers can be
/// made to fail, and every call can be slowed down to simulate a slow feed.
#[derive(Debug, Default)]
pub struct FixedQuoteProvider {
    prices: Mutex<HashMap<(AssetClass, String), f64>>,
    failing: Mutex<HashSet<String>>,
    delay: Option<Duration>,
}

impl FixedQuoteProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A table preloaded with a handful of well-known tickers
    #[must_use]
    pub fn with_demo_prices() -> Self {
        Self::new()
            .with_price("AAPL", AssetClass::Stock, 190.0)
            .with_price("MSFT", AssetClass::Stock, 420.0)
            .with_price("GOOGL", AssetClass::Stock, 170.0)
            .with_price("TSLA", AssetClass::Stock, 245.0)
            .with_price("NVDA", AssetClass::Stock, 120.0)
            .with_price("BTC", AssetClass::Crypto, 64_000.0)
            .with_price("ETH", AssetClass::Crypto, 3_100.0)
            .with_price("SOL", AssetClass::Crypto, 150.0)
    }

    #[must_use]
    pub fn with_price(self, ticker: &str, asset_class: AssetClass, price: f64) -> Self {
        self.set_price(ticker, asset_class, price);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_price(&self, ticker: &str, asset_class: AssetClass, price: f64) {
        self.prices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((asset_class, ticker.to_ascii_uppercase()), price);
    }

    /// Make every lookup for `ticker` fail with `Unavailable`
    pub fn fail(&self, ticker: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ticker.to_ascii_uppercase());
    }

    pub fn recover(&self, ticker: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ticker.to_ascii_uppercase());
    }

    async fn lookup(&self, ticker: &str, asset_class: AssetClass) -> Result<f64, QuoteError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if asset_class == AssetClass::Crypto {
            require_crypto_id(ticker)?;
        }

        let ticker = ticker.to_ascii_uppercase();
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&ticker)
        {
            debug!("Simulated outage for {ticker}");
            return Err(QuoteError::Unavailable(format!(
                "Simulated outage for {ticker}"
            )));
        }

        self.prices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(asset_class, ticker.clone()))
            .copied()
            .ok_or_else(|| QuoteError::Unavailable(format!("No price set for {ticker}")))
    }
}

#[async_trait]
impl QuoteProvider for FixedQuoteProvider {
    async fn get_price(&self, ticker: &str, asset_class: AssetClass) -> Result<Quote, QuoteError> {
        let price = self.lookup(ticker, asset_class).await?;
        Ok(Quote {
            ticker: ticker.to_ascii_uppercase(),
            asset_class,
            price,
            timestamp: Utc::now(),
            change_24h: None,
            market_cap: None,
            volume_24h: None,
        })
    }

    /// A flat series, one point per day, at the current price
    async fn get_history(
        &self,
        ticker: &str,
        asset_class: AssetClass,
        period: HistoryPeriod,
    ) -> Result<Vec<PricePoint>, QuoteError> {
        let price = self.lookup(ticker, asset_class).await?;
        let now = Utc::now();
        let days = i64::from(period.days());
        Ok((0..=days)
            .rev()
            .map(|back| PricePoint {
                timestamp: now - chrono::Duration::days(back),
                open: None,
                high: None,
                low: None,
                close: price,
                volume: None,
            })
            .collect())
    }

    async fn get_info(
        &self,
        ticker: &str,
        asset_class: AssetClass,
    ) -> Result<AssetInfo, QuoteError> {
        self.lookup(ticker, asset_class).await?;
        Ok(AssetInfo {
            ticker: ticker.to_ascii_uppercase(),
            name: ticker.to_ascii_uppercase(),
            currency: Some("USD".to_string()),
            ..AssetInfo::default()
        })
    }
}
