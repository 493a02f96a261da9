use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

mod fixed;
mod market;

pub use fixed::FixedQuoteProvider;
pub use market::MarketQuoteProvider;

/// Which quote path a ticker is priced through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stock,
    Crypto,
}

impl AssetClass {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Stock => "stock",
            AssetClass::Crypto => "crypto",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAssetClass(pub String);

impl fmt::Display for UnknownAssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown asset class '{}', expected 'stock' or 'crypto'", self.0)
    }
}

impl std::error::Error for UnknownAssetClass {}

impl FromStr for AssetClass {
    type Err = UnknownAssetClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stock" => Ok(AssetClass::Stock),
            "crypto" => Ok(AssetClass::Crypto),
            _ => Err(UnknownAssetClass(s.to_string())),
        }
    }
}

/// Look-back window for historical prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum HistoryPeriod {
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "1w")]
    Week,
    #[default]
    #[serde(rename = "1mo")]
    Month,
    #[serde(rename = "3mo")]
    Quarter,
    #[serde(rename = "1y")]
    Year,
}

impl HistoryPeriod {
    /// Number of days requested from the crypto provider
    #[must_use]
    pub fn days(&self) -> u32 {
        match self {
            HistoryPeriod::Day => 1,
            HistoryPeriod::Week => 7,
            HistoryPeriod::Month => 30,
            HistoryPeriod::Quarter => 90,
            HistoryPeriod::Year => 365,
        }
    }
}

impl FromStr for HistoryPeriod {
    type Err = std::convert::Infallible;

    /// Unknown periods fall back to one month
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "1d" => HistoryPeriod::Day,
            "1w" | "5d" => HistoryPeriod::Week,
            "3mo" => HistoryPeriod::Quarter,
            "1y" => HistoryPeriod::Year,
            _ => HistoryPeriod::Month,
        })
    }
}

/// A current price for a ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Quote {
    pub ticker: String,
    pub asset_class: AssetClass,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<f64>,
}

/// One point of a price series. Crypto series only carry `close`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    pub close: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// Descriptive metadata about a ticker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AssetInfo {
    pub ticker: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fifty_two_week_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fifty_two_week_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_change_24h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circulating_supply: Option<f64>,
}

/// A symbol matched by a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SearchResult {
    pub symbol: String,
    pub name: String,
    pub asset_class: AssetClass,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuoteError {
    /// The provider could not answer (network failure, timeout, empty data)
    Unavailable(String),
    /// The provider never prices this ticker
    NotSupported(String),
}

impl fmt::Display for QuoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteError::Unavailable(msg) => write!(f, "Quote unavailable: {msg}"),
            QuoteError::NotSupported(msg) => write!(f, "Quote not supported: {msg}"),
        }
    }
}

impl std::error::Error for QuoteError {}

impl From<reqwest::Error> for QuoteError {
    fn from(error: reqwest::Error) -> Self {
        QuoteError::Unavailable(error.to_string())
    }
}

// Quote provider trait
#[async_trait]
pub trait QuoteProvider: Send + Sync + std::fmt::Debug {
    /// Current price for a ticker
    async fn get_price(&self, ticker: &str, asset_class: AssetClass) -> Result<Quote, QuoteError>;

    /// Historical prices, oldest first
    async fn get_history(
        &self,
        ticker: &str,
        asset_class: AssetClass,
        period: HistoryPeriod,
    ) -> Result<Vec<PricePoint>, QuoteError>;

    /// Descriptive metadata
    async fn get_info(&self, ticker: &str, asset_class: AssetClass)
    -> Result<AssetInfo, QuoteError>;
}

/// Symbols priced on the crypto path, mapped to their CoinGecko ids
pub const CRYPTO_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("USDT", "tether"),
    ("BNB", "binancecoin"),
    ("SOL", "solana"),
    ("XRP", "ripple"),
    ("ADA", "cardano"),
    ("DOGE", "dogecoin"),
    ("AVAX", "avalanche-2"),
    ("DOT", "polkadot"),
    ("MATIC", "matic-network"),
    ("LINK", "chainlink"),
    ("UNI", "uniswap"),
    ("ATOM", "cosmos"),
    ("LTC", "litecoin"),
];

/// Resolve a crypto symbol to its provider id
#[must_use]
pub fn crypto_id(symbol: &str) -> Option<&'static str> {
    let symbol = symbol.to_ascii_uppercase();
    CRYPTO_IDS
        .iter()
        .find(|(sym, _)| *sym == symbol)
        .map(|(_, id)| *id)
}

/// Fails with `NotSupported` for symbols outside the crypto table
pub fn require_crypto_id(symbol: &str) -> Result<&'static str, QuoteError> {
    crypto_id(symbol)
        .ok_or_else(|| QuoteError::NotSupported(format!("Cryptocurrency {symbol} is not mapped")))
}

/// Case-insensitive search over the crypto table, by symbol or id
#[must_use]
pub fn search_crypto(query: &str) -> Vec<SearchResult> {
    let upper = query.to_ascii_uppercase();
    let lower = query.to_ascii_lowercase();
    CRYPTO_IDS
        .iter()
        .filter(|(symbol, id)| symbol.contains(&upper) || id.contains(&lower))
        .map(|(symbol, id)| SearchResult {
            symbol: (*symbol).to_string(),
            name: title_case(&id.replace('-', " ")),
            asset_class: AssetClass::Crypto,
        })
        .collect()
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests;
