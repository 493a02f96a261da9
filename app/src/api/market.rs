use std::future::Future;

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use domain::{AssetClass, Envelope};
use quote_adapter::{
    AssetInfo, HistoryPeriod, PricePoint, Quote, QuoteError, SearchResult, search_crypto,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use super::{ApiError, ApiJson, ApiQuery, ApiResult, AppState, ok};

const POPULAR_STOCKS: &[&str] = &["AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "NVDA", "META"];
const POPULAR_CRYPTOS: &[&str] = &["BTC", "ETH", "BNB", "SOL", "XRP"];

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AssetQuery {
    /// `stock` (default) or `crypto`
    #[serde(rename = "type")]
    pub asset_class: Option<AssetClass>,
    /// History period: 1d, 1w, 1mo (default), 3mo or 1y
    pub period: Option<String>,
}

impl AssetQuery {
    fn asset_class(&self) -> AssetClass {
        self.asset_class.unwrap_or(AssetClass::Stock)
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    /// `stock`, `crypto` or `all` (default)
    #[serde(rename = "type")]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct BatchItem {
    pub ticker: String,
    #[serde(rename = "type", default = "default_asset_class")]
    pub asset_class: AssetClass,
}

fn default_asset_class() -> AssetClass {
    AssetClass::Stock
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct BatchPriceRequest {
    pub tickers: Vec<BatchItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchPrice {
    pub ticker: String,
    #[serde(rename = "type")]
    pub asset_class: AssetClass,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrendingEntry {
    pub ticker: String,
    pub price: f64,
    pub change_24h: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Trending {
    pub stocks: Vec<TrendingEntry>,
    pub crypto: Vec<TrendingEntry>,
}

pub fn router(state: AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .with_state(state)
        .routes(routes!(get_price))
        .routes(routes!(get_history))
        .routes(routes!(get_info))
        .routes(routes!(search))
        .routes(routes!(trending))
        .routes(routes!(batch_prices))
}

/// Quote provider call bounded by the engine's quote timeout
async fn bounded<T>(
    state: &AppState,
    call: impl Future<Output = Result<T, QuoteError>>,
) -> Result<T, QuoteError> {
    let timeout = state.celesta().engine().config().quote_timeout;
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| Err(QuoteError::Unavailable(format!("timed out after {timeout:?}"))))
}

async fn quote(
    state: &AppState,
    ticker: &str,
    asset_class: AssetClass,
) -> Result<Quote, QuoteError> {
    bounded(state, state.celesta().quotes().get_price(ticker, asset_class)).await
}

/// Current price of an asset
#[utoipa::path(
    get,
    path = "/price/{ticker}",
    params(("ticker" = String, Path, description = "Ticker symbol"), AssetQuery),
    responses(
        (status = 200, body = Envelope<Quote>),
        (status = 400, description = "Crypto symbol not supported"),
        (status = 502, description = "Price unavailable")
    ),
    tag = super::MARKET_TAG
)]
async fn get_price(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    ApiQuery(query): ApiQuery<AssetQuery>,
) -> ApiResult<Quote> {
    let ticker = ticker.to_uppercase();
    quote(&state, &ticker, query.asset_class())
        .await
        .map_err(|e| ApiError::from_quote(&ticker, &e))
        .and_then(ok)
}

/// Historical prices, oldest first
#[utoipa::path(
    get,
    path = "/history/{ticker}",
    params(("ticker" = String, Path, description = "Ticker symbol"), AssetQuery),
    responses(
        (status = 200, body = Envelope<Vec<PricePoint>>),
        (status = 502, description = "History unavailable")
    ),
    tag = super::MARKET_TAG
)]
async fn get_history(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    ApiQuery(query): ApiQuery<AssetQuery>,
) -> ApiResult<Vec<PricePoint>> {
    let ticker = ticker.to_uppercase();
    let period: HistoryPeriod = query
        .period
        .as_deref()
        .unwrap_or_default()
        .parse()
        .unwrap_or_default();
    let quotes = state.celesta().quotes();
    bounded(&state, quotes.get_history(&ticker, query.asset_class(), period))
        .await
        .map_err(|e| ApiError::from_quote(&ticker, &e))
        .and_then(ok)
}

/// Descriptive information about an asset
#[utoipa::path(
    get,
    path = "/info/{ticker}",
    params(("ticker" = String, Path, description = "Ticker symbol"), AssetQuery),
    responses(
        (status = 200, body = Envelope<AssetInfo>),
        (status = 502, description = "Information unavailable")
    ),
    tag = super::MARKET_TAG
)]
async fn get_info(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    ApiQuery(query): ApiQuery<AssetQuery>,
) -> ApiResult<AssetInfo> {
    let ticker = ticker.to_uppercase();
    let quotes = state.celesta().quotes();
    bounded(&state, quotes.get_info(&ticker, query.asset_class()))
        .await
        .map_err(|e| ApiError::from_quote(&ticker, &e))
        .and_then(ok)
}

/// Search stocks and cryptocurrencies
///
/// Crypto matches come from the supported symbol table, a stock match is
/// an exact ticker the market data provider knows.
#[utoipa::path(
    get,
    path = "/search",
    params(SearchQuery),
    responses(
        (status = 200, body = Envelope<Vec<SearchResult>>),
        (status = 400, description = "Missing query"),
        (status = 404, description = "No results")
    ),
    tag = super::MARKET_TAG
)]
async fn search(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> ApiResult<Vec<SearchResult>> {
    let term = query.q.trim();
    if term.is_empty() {
        return Err(ApiError::validation("query parameter 'q' is required"));
    }
    let scope = query.scope.as_deref().unwrap_or("all");

    let mut results = Vec::new();
    if matches!(scope, "stock" | "all") {
        let ticker = term.to_uppercase();
        let quotes = state.celesta().quotes();
        match bounded(&state, quotes.get_info(&ticker, AssetClass::Stock)).await {
            Ok(info) => results.push(SearchResult {
                symbol: info.ticker,
                name: info.name,
                asset_class: AssetClass::Stock,
            }),
            Err(e) => debug!("No stock match for {ticker}: {e}"),
        }
    }
    if matches!(scope, "crypto" | "all") {
        results.extend(search_crypto(term));
    }

    if results.is_empty() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("No results found for '{term}'"),
        ));
    }
    ok(results)
}

/// Prices of popular stocks and cryptocurrencies
///
/// Tickers whose price cannot be fetched are left out.
#[utoipa::path(
    get,
    path = "/trending",
    responses((status = 200, body = Envelope<Trending>)),
    tag = super::MARKET_TAG
)]
async fn trending(State(state): State<AppState>) -> ApiResult<Trending> {
    let mut entries = Trending {
        stocks: Vec::new(),
        crypto: Vec::new(),
    };
    for (tickers, asset_class) in [
        (POPULAR_STOCKS, AssetClass::Stock),
        (POPULAR_CRYPTOS, AssetClass::Crypto),
    ] {
        for ticker in tickers {
            let Ok(q) = quote(&state, ticker, asset_class).await else {
                continue;
            };
            let entry = TrendingEntry {
                ticker: q.ticker,
                price: q.price,
                change_24h: q.change_24h,
            };
            match asset_class {
                AssetClass::Stock => entries.stocks.push(entry),
                AssetClass::Crypto => entries.crypto.push(entry),
            }
        }
    }
    ok(entries)
}

/// Current prices for several assets at once
///
/// Tickers whose price cannot be fetched are left out of the result.
#[utoipa::path(
    post,
    path = "/batch-prices",
    request_body = BatchPriceRequest,
    responses(
        (status = 200, body = Envelope<Vec<BatchPrice>>),
        (status = 400, description = "No tickers provided")
    ),
    tag = super::MARKET_TAG
)]
async fn batch_prices(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<BatchPriceRequest>,
) -> ApiResult<Vec<BatchPrice>> {
    if payload.tickers.is_empty() {
        return Err(ApiError::validation("no tickers provided"));
    }

    let mut prices = Vec::with_capacity(payload.tickers.len());
    for item in payload.tickers {
        let ticker = item.ticker.trim().to_uppercase();
        match quote(&state, &ticker, item.asset_class).await {
            Ok(q) => prices.push(BatchPrice {
                ticker,
                asset_class: item.asset_class,
                price: q.price,
                timestamp: q.timestamp,
            }),
            Err(e) => debug!("Skipping {ticker} in batch: {e}"),
        }
    }
    ok(prices)
}
