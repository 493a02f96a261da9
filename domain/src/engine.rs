use std::sync::Arc;

use database_adapter::{
    DbError, LedgerStore,
    model::{AssetClass, Holding, NewTransaction, TradeSide, Transaction, UserId},
};
use quote_adapter::{Quote, QuoteError, QuoteProvider};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::{
    config::EngineConfig,
    error::PortfolioError,
    locks::HoldingLocks,
    portfolio::{HoldingValuation, PortfolioSummary, PortfolioValuation},
};

/// Outcome of a buy or sell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TradeReceipt {
    pub transaction: Transaction,
    /// Position after the trade, `None` when it was fully sold
    pub holding: Option<Holding>,
    /// Cost of a buy or proceeds of a sell
    pub total: f64,
    pub message: String,
}

/// Applies trades to the ledger at live prices and values portfolios.
#[derive(Debug)]
pub struct PortfolioEngine {
    ledger: Arc<dyn LedgerStore>,
    quotes: Arc<dyn QuoteProvider>,
    locks: HoldingLocks,
    config: EngineConfig,
}

fn normalize_ticker(ticker: &str) -> Result<String, PortfolioError> {
    let ticker = ticker.trim().to_uppercase();
    if ticker.is_empty() {
        return Err(PortfolioError::Validation("ticker must not be empty".into()));
    }
    Ok(ticker)
}

fn check_quantity(quantity: f64) -> Result<(), PortfolioError> {
    if quantity.is_finite() && quantity > 0.0 {
        Ok(())
    } else {
        Err(PortfolioError::InvalidQuantity(quantity))
    }
}

impl PortfolioEngine {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        quotes: Arc<dyn QuoteProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            quotes,
            locks: HoldingLocks::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Price lookup bounded by the configured timeout
    async fn fetch_quote(
        &self,
        ticker: &str,
        asset_class: AssetClass,
    ) -> Result<Quote, PortfolioError> {
        fetch_with_timeout(&*self.quotes, &self.config, ticker, asset_class)
            .await
            .map_err(|e| PortfolioError::price_unavailable(ticker, &e))
    }

    /// Buy `quantity` units of `ticker` at the current market price.
    ///
    /// # Errors
    /// - `InvalidQuantity` unless the quantity is finite and positive
    /// - `Validation` if `ticker` is already held under another asset class
    /// - `PriceUnavailable` if no quote could be obtained; the ledger is untouched
    pub async fn buy(
        &self,
        user_id: UserId,
        ticker: &str,
        asset_class: AssetClass,
        quantity: f64,
    ) -> Result<TradeReceipt, PortfolioError> {
        self.trade(user_id, ticker, asset_class, TradeSide::Buy, quantity)
            .await
    }

    /// Sell `quantity` units of `ticker` at the current market price.
    ///
    /// # Errors
    /// - `InvalidQuantity` unless the quantity is finite and positive
    /// - `Validation` if `ticker` is held under another asset class
    /// - `PriceUnavailable` if no quote could be obtained
    /// - `NotFound` if the user holds no `ticker`
    /// - `InsufficientQuantity` if the user holds less than `quantity`
    pub async fn sell(
        &self,
        user_id: UserId,
        ticker: &str,
        asset_class: AssetClass,
        quantity: f64,
    ) -> Result<TradeReceipt, PortfolioError> {
        self.trade(user_id, ticker, asset_class, TradeSide::Sell, quantity)
            .await
    }

    async fn trade(
        &self,
        user_id: UserId,
        ticker: &str,
        asset_class: AssetClass,
        side: TradeSide,
        quantity: f64,
    ) -> Result<TradeReceipt, PortfolioError> {
        check_quantity(quantity)?;
        let ticker = normalize_ticker(ticker)?;

        // Checked before pricing, then again under the lock
        self.check_asset_class(user_id, &ticker, asset_class).await?;

        // Never hold the holding lock across a provider call
        let quote = self.fetch_quote(&ticker, asset_class).await?;
        self.execute_at(user_id, &ticker, asset_class, side, quantity, quote.price)
            .await
    }

    /// A trade must name the asset class the holding was opened with
    async fn check_asset_class(
        &self,
        user_id: UserId,
        ticker: &str,
        asset_class: AssetClass,
    ) -> Result<(), PortfolioError> {
        match self.ledger.get_holding(&user_id, ticker).await? {
            Some(holding) if holding.asset_class != asset_class => {
                Err(PortfolioError::Validation(format!(
                    "{ticker} is held as {}, not {}",
                    holding.asset_class.as_str(),
                    asset_class.as_str()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Apply a trade at a known price under the (user, ticker) lock
    pub(crate) async fn execute_at(
        &self,
        user_id: UserId,
        ticker: &str,
        asset_class: AssetClass,
        side: TradeSide,
        quantity: f64,
        price: f64,
    ) -> Result<TradeReceipt, PortfolioError> {
        let trade = NewTransaction {
            user_id,
            ticker: ticker.to_string(),
            asset_class,
            side,
            quantity,
            price,
        };

        let _guard = self.locks.acquire(user_id, ticker).await;
        self.check_asset_class(user_id, ticker, asset_class).await?;
        let applied = self.ledger.apply_trade(trade).await.map_err(|e| match e {
            DbError::InsufficientQuantity { held, requested } => {
                PortfolioError::InsufficientQuantity {
                    ticker: ticker.to_string(),
                    held,
                    requested,
                }
            }
            DbError::NotFound(_) if side == TradeSide::Sell => {
                PortfolioError::NotFound(format!("no {ticker} holding"))
            }
            DbError::Conflict(_) | DbError::SqlxError(_) | DbError::Corrupt(_) => {
                error!("Ledger failed to apply {side} {quantity} {ticker} for {user_id}: {e}");
                PortfolioError::from(e)
            }
            other => PortfolioError::from(other),
        })?;

        let total = applied.transaction.total();
        let verb = match side {
            TradeSide::Buy => "Bought",
            TradeSide::Sell => "Sold",
        };
        info!("{verb} {quantity} {ticker} at ${price} for user {user_id}");

        Ok(TradeReceipt {
            message: format!("{verb} {quantity} {ticker} at ${price}"),
            total,
            holding: applied.holding,
            transaction: applied.transaction,
        })
    }

    /// Holdings of a user with their live valuation.
    ///
    /// Prices are fetched concurrently and best-effort: a ticker whose
    /// price fails is returned unpriced instead of failing the call.
    ///
    /// # Errors
    /// - `Storage` if the holdings cannot be read
    pub async fn get_holdings(
        &self,
        user_id: UserId,
    ) -> Result<Vec<HoldingValuation>, PortfolioError> {
        let holdings = self.ledger.list_holdings(&user_id).await?;

        let mut lookups = JoinSet::new();
        for (index, holding) in holdings.iter().enumerate() {
            let quotes = Arc::clone(&self.quotes);
            let config = self.config.clone();
            let ticker = holding.ticker.clone();
            let asset_class = holding.asset_class;
            lookups.spawn(async move {
                let result = fetch_with_timeout(&*quotes, &config, &ticker, asset_class).await;
                (index, result)
            });
        }

        let mut prices: Vec<Option<Result<f64, String>>> = vec![None; holdings.len()];
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((index, result)) => {
                    prices[index] = Some(result.map(|q| q.price).map_err(|e| e.to_string()));
                }
                Err(e) => error!("Price lookup task failed: {e}"),
            }
        }

        Ok(holdings
            .iter()
            .zip(prices)
            .map(|(holding, price)| match price {
                Some(Ok(price)) => HoldingValuation::priced(holding, price),
                Some(Err(reason)) => {
                    warn!("Valuing {} without a price: {reason}", holding.ticker);
                    HoldingValuation::unpriced(holding, reason)
                }
                None => HoldingValuation::unpriced(holding, "price lookup aborted".into()),
            })
            .collect())
    }

    /// # Errors
    /// - `Storage` if the holdings cannot be read
    pub async fn valuation(&self, user_id: UserId) -> Result<PortfolioValuation, PortfolioError> {
        Ok(PortfolioValuation::new(self.get_holdings(user_id).await?))
    }

    /// # Errors
    /// - `Storage` if the holdings cannot be read
    pub async fn get_summary(&self, user_id: UserId) -> Result<PortfolioSummary, PortfolioError> {
        Ok(self.valuation(user_id).await?.summary)
    }

    /// Most recent transactions first, `limit` defaults to 50 and is clamped
    /// to `[1, 1000]`
    ///
    /// # Errors
    /// - `Storage` if the log cannot be read
    pub async fn get_transactions(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, PortfolioError> {
        let limit = self.config.transaction_limit(limit);
        debug!("Listing {limit} transactions for {user_id}");
        Ok(self.ledger.list_transactions(&user_id, limit).await?)
    }

    #[must_use]
    pub fn quotes(&self) -> &Arc<dyn QuoteProvider> {
        &self.quotes
    }
}

async fn fetch_with_timeout(
    quotes: &dyn QuoteProvider,
    config: &EngineConfig,
    ticker: &str,
    asset_class: AssetClass,
) -> Result<Quote, QuoteError> {
    match tokio::time::timeout(config.quote_timeout, quotes.get_price(ticker, asset_class)).await
    {
        Ok(Ok(quote)) if quote.price.is_finite() && quote.price > 0.0 => Ok(quote),
        Ok(Ok(quote)) => Err(QuoteError::Unavailable(format!(
            "provider returned an unusable price {} for {ticker}",
            quote.price
        ))),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(QuoteError::Unavailable(format!(
            "timed out after {:?}",
            config.quote_timeout
        ))),
    }
}
