use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    AssetClass, AssetInfo, HistoryPeriod, PricePoint, Quote, QuoteError, QuoteProvider,
    require_crypto_id,
};

const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";
const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; celesta/0.1)";

/// Live quotes: stocks through the Yahoo Finance chart endpoint,
/// crypto through CoinGecko.
#[derive(Debug, Clone)]
pub struct MarketQuoteProvider {
    client: reqwest::Client,
    yahoo_base: String,
    coingecko_base: String,
}

impl MarketQuoteProvider {
    /// # Errors
    /// Returns `QuoteError::Unavailable` if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self, QuoteError> {
        Self::with_base_urls(timeout, YAHOO_BASE_URL, COINGECKO_BASE_URL)
    }

    /// # Errors
    /// Returns `QuoteError::Unavailable` if the HTTP client cannot be built
    pub fn with_base_urls(
        timeout: Duration,
        yahoo_base: &str,
        coingecko_base: &str,
    ) -> Result<Self, QuoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            yahoo_base: yahoo_base.trim_end_matches('/').to_string(),
            coingecko_base: coingecko_base.trim_end_matches('/').to_string(),
        })
    }

    async fn yahoo_chart(
        &self,
        ticker: &str,
        range: &str,
        interval: &str,
    ) -> Result<ChartResult, QuoteError> {
        let url = format!("{}/v8/finance/chart/{}", self.yahoo_base, ticker);
        debug!("Fetching chart for {ticker} (range {range}, interval {interval})");
        let response: ChartResponse = self
            .client
            .get(&url)
            .query(&[("range", range), ("interval", interval)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.chart.error {
            return Err(QuoteError::Unavailable(format!(
                "{ticker}: {}",
                error.description.unwrap_or_else(|| "chart error".to_string())
            )));
        }
        response
            .chart
            .result
            .and_then(|mut results| results.pop())
            .ok_or_else(|| QuoteError::Unavailable(format!("No data available for {ticker}")))
    }

    async fn stock_price(&self, ticker: &str) -> Result<Quote, QuoteError> {
        let chart = self.yahoo_chart(ticker, "1d", "1m").await?;
        let price = chart
            .meta
            .regular_market_price
            .or_else(|| chart.closes().last().copied())
            .filter(|price| price.is_finite() && *price > 0.0)
            .ok_or_else(|| QuoteError::Unavailable(format!("No price available for {ticker}")))?;

        Ok(Quote {
            ticker: ticker.to_string(),
            asset_class: AssetClass::Stock,
            price,
            timestamp: chart
                .meta
                .regular_market_time
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
                .unwrap_or_else(Utc::now),
            change_24h: None,
            market_cap: None,
            volume_24h: chart.meta.regular_market_volume,
        })
    }

    async fn stock_history(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<PricePoint>, QuoteError> {
        let (range, interval) = match period {
            HistoryPeriod::Day => ("1d", "5m"),
            HistoryPeriod::Week => ("5d", "1h"),
            HistoryPeriod::Month => ("1mo", "1d"),
            HistoryPeriod::Quarter => ("3mo", "1d"),
            HistoryPeriod::Year => ("1y", "1d"),
        };
        let chart = self.yahoo_chart(ticker, range, interval).await?;
        let points = chart.points();
        if points.is_empty() {
            return Err(QuoteError::Unavailable(format!(
                "No history available for {ticker}"
            )));
        }
        Ok(points)
    }

    async fn stock_info(&self, ticker: &str) -> Result<AssetInfo, QuoteError> {
        let meta = self.yahoo_chart(ticker, "1d", "1d").await?.meta;
        Ok(AssetInfo {
            ticker: ticker.to_string(),
            name: meta
                .long_name
                .or(meta.short_name)
                .unwrap_or_else(|| ticker.to_string()),
            currency: meta.currency,
            volume: meta.regular_market_volume,
            day_high: meta.regular_market_day_high,
            day_low: meta.regular_market_day_low,
            fifty_two_week_high: meta.fifty_two_week_high,
            fifty_two_week_low: meta.fifty_two_week_low,
            ..AssetInfo::default()
        })
    }

    async fn crypto_price(&self, ticker: &str) -> Result<Quote, QuoteError> {
        let id = require_crypto_id(ticker)?;
        let url = format!("{}/simple/price", self.coingecko_base);
        let mut prices: HashMap<String, SimplePrice> = self
            .client
            .get(&url)
            .query(&[
                ("ids", id),
                ("vs_currencies", "usd"),
                ("include_24hr_change", "true"),
                ("include_market_cap", "true"),
                ("include_24hr_vol", "true"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let entry = prices
            .remove(id)
            .ok_or_else(|| QuoteError::Unavailable(format!("No data available for {ticker}")))?;
        let price = entry
            .usd
            .filter(|price| price.is_finite() && *price > 0.0)
            .ok_or_else(|| QuoteError::Unavailable(format!("No price available for {ticker}")))?;

        Ok(Quote {
            ticker: ticker.to_ascii_uppercase(),
            asset_class: AssetClass::Crypto,
            price,
            timestamp: Utc::now(),
            change_24h: entry.usd_24h_change,
            market_cap: entry.usd_market_cap,
            volume_24h: entry.usd_24h_vol,
        })
    }

    async fn crypto_history(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<PricePoint>, QuoteError> {
        let id = require_crypto_id(ticker)?;
        let days = period.days();
        let url = format!("{}/coins/{}/market_chart", self.coingecko_base, id);
        let mut query = vec![("vs_currency", "usd".to_string()), ("days", days.to_string())];
        if days > 1 {
            query.push(("interval", "daily".to_string()));
        }

        let chart: MarketChart = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let points: Vec<PricePoint> = chart
            .prices
            .into_iter()
            .filter_map(|[millis, price]| {
                let timestamp = DateTime::<Utc>::from_timestamp_millis(millis as i64)?;
                Some(PricePoint {
                    timestamp,
                    open: None,
                    high: None,
                    low: None,
                    close: price,
                    volume: None,
                })
            })
            .collect();
        if points.is_empty() {
            return Err(QuoteError::Unavailable(format!(
                "No history available for {ticker}"
            )));
        }
        Ok(points)
    }

    async fn crypto_info(&self, ticker: &str) -> Result<AssetInfo, QuoteError> {
        let id = require_crypto_id(ticker)?;
        let url = format!("{}/coins/{}", self.coingecko_base, id);
        let coin: CoinDetail = self
            .client
            .get(&url)
            .query(&[
                ("localization", "false"),
                ("tickers", "false"),
                ("community_data", "false"),
                ("developer_data", "false"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let market = coin.market_data.unwrap_or_default();
        Ok(AssetInfo {
            ticker: ticker.to_ascii_uppercase(),
            name: coin.name.unwrap_or_else(|| ticker.to_string()),
            description: coin
                .description
                .and_then(|d| d.en)
                .filter(|text| !text.is_empty()),
            currency: Some("USD".to_string()),
            market_cap: market.market_cap.and_then(|m| m.usd),
            volume: market.total_volume.and_then(|m| m.usd),
            day_high: market.high_24h.and_then(|m| m.usd),
            day_low: market.low_24h.and_then(|m| m.usd),
            price_change_24h: market.price_change_percentage_24h,
            circulating_supply: market.circulating_supply,
            ..AssetInfo::default()
        })
    }
}

#[async_trait]
impl QuoteProvider for MarketQuoteProvider {
    async fn get_price(&self, ticker: &str, asset_class: AssetClass) -> Result<Quote, QuoteError> {
        let result = match asset_class {
            AssetClass::Stock => self.stock_price(ticker).await,
            AssetClass::Crypto => self.crypto_price(ticker).await,
        };
        if let Err(e) = &result {
            warn!("Price lookup for {ticker} ({asset_class}) failed: {e}");
        }
        result
    }

    async fn get_history(
        &self,
        ticker: &str,
        asset_class: AssetClass,
        period: HistoryPeriod,
    ) -> Result<Vec<PricePoint>, QuoteError> {
        match asset_class {
            AssetClass::Stock => self.stock_history(ticker, period).await,
            AssetClass::Crypto => self.crypto_history(ticker, period).await,
        }
    }

    async fn get_info(
        &self,
        ticker: &str,
        asset_class: AssetClass,
    ) -> Result<AssetInfo, QuoteError> {
        match asset_class {
            AssetClass::Stock => self.stock_info(ticker).await,
            AssetClass::Crypto => self.crypto_info(ticker).await,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    currency: Option<String>,
    long_name: Option<String>,
    short_name: Option<String>,
    regular_market_price: Option<f64>,
    regular_market_time: Option<i64>,
    regular_market_volume: Option<f64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    fifty_two_week_high: Option<f64>,
    fifty_two_week_low: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<OhlcSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct OhlcSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartResult {
    fn closes(&self) -> Vec<f64> {
        self.indicators
            .quote
            .first()
            .map(|series| series.close.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// Zips the timestamp column with the OHLCV columns, skipping bars without a close
    fn points(&self) -> Vec<PricePoint> {
        let Some(series) = self.indicators.quote.first() else {
            return Vec::new();
        };
        let at = |column: &[Option<f64>], i: usize| column.get(i).copied().flatten();

        self.timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                let close = at(&series.close, i)?;
                Some(PricePoint {
                    timestamp: Utc.timestamp_opt(*ts, 0).single()?,
                    open: at(&series.open, i),
                    high: at(&series.high, i),
                    low: at(&series.low, i),
                    close,
                    volume: at(&series.volume, i),
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<f64>,
    usd_24h_change: Option<f64>,
    usd_market_cap: Option<f64>,
    usd_24h_vol: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct CoinDetail {
    name: Option<String>,
    description: Option<CoinDescription>,
    market_data: Option<CoinMarketData>,
}

#[derive(Debug, Deserialize)]
struct CoinDescription {
    en: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CoinMarketData {
    market_cap: Option<UsdValue>,
    total_volume: Option<UsdValue>,
    high_24h: Option<UsdValue>,
    low_24h: Option<UsdValue>,
    price_change_percentage_24h: Option<f64>,
    circulating_supply: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct UsdValue {
    usd: Option<f64>,
}
