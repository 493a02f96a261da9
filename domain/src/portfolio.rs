use chrono::{DateTime, Utc};
use database_adapter::model::{AssetClass, Holding};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Percentage change from `base` to `current`, 0 when there is no base
#[must_use]
pub fn percent_change(current: f64, base: f64) -> f64 {
    if base > 0.0 {
        (current / base - 1.0) * 100.0
    } else {
        0.0
    }
}

/// A holding enriched with its live market value.
///
/// When the price could not be fetched, `current_price` is `None`, the
/// value and P&L fields are zero and `price_error` says why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HoldingValuation {
    pub ticker: String,
    pub asset_class: AssetClass,
    pub quantity: f64,
    pub average_buy_price: f64,
    pub current_price: Option<f64>,
    pub current_value: f64,
    pub cost_basis: f64,
    pub profit_loss: f64,
    pub profit_loss_percent: f64,
    pub price_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl HoldingValuation {
    #[must_use]
    pub fn priced(holding: &Holding, price: f64) -> Self {
        Self {
            ticker: holding.ticker.clone(),
            asset_class: holding.asset_class,
            quantity: holding.quantity,
            average_buy_price: holding.average_buy_price,
            current_price: Some(price),
            current_value: price * holding.quantity,
            cost_basis: holding.cost_basis(),
            profit_loss: (price - holding.average_buy_price) * holding.quantity,
            profit_loss_percent: percent_change(price, holding.average_buy_price),
            price_error: None,
            updated_at: holding.updated_at,
        }
    }

    #[must_use]
    pub fn unpriced(holding: &Holding, reason: String) -> Self {
        Self {
            ticker: holding.ticker.clone(),
            asset_class: holding.asset_class,
            quantity: holding.quantity,
            average_buy_price: holding.average_buy_price,
            current_price: None,
            current_value: 0.0,
            cost_basis: holding.cost_basis(),
            profit_loss: 0.0,
            profit_loss_percent: 0.0,
            price_error: Some(reason),
            updated_at: holding.updated_at,
        }
    }

    #[must_use]
    pub fn is_priced(&self) -> bool {
        self.current_price.is_some()
    }
}

/// Aggregate figures for a whole portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PortfolioSummary {
    pub total_value: f64,
    pub total_cost: f64,
    pub total_profit_loss: f64,
    pub total_profit_loss_percent: f64,
    pub holdings_count: usize,
    /// Holdings whose price could not be fetched; excluded from value and cost
    pub unpriced_count: usize,
}

impl PortfolioSummary {
    #[must_use]
    pub fn from_valuations(holdings: &[HoldingValuation]) -> Self {
        let total_value: f64 = holdings.iter().map(|h| h.current_value).sum();
        // An unpriced holding is left out of both sides so an outage is not a loss
        let total_cost: f64 = holdings
            .iter()
            .filter(|h| h.is_priced())
            .map(|h| h.cost_basis)
            .sum();
        Self {
            total_value,
            total_cost,
            total_profit_loss: total_value - total_cost,
            total_profit_loss_percent: percent_change(total_value, total_cost),
            holdings_count: holdings.len(),
            unpriced_count: holdings.iter().filter(|h| !h.is_priced()).count(),
        }
    }

    /// Copy with every monetary figure rounded to cents
    #[must_use]
    pub fn rounded(&self) -> Self {
        Self {
            total_value: round_cents(self.total_value),
            total_cost: round_cents(self.total_cost),
            total_profit_loss: round_cents(self.total_profit_loss),
            total_profit_loss_percent: round_cents(self.total_profit_loss_percent),
            ..self.clone()
        }
    }
}

#[must_use]
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Point-in-time valuation of every holding of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PortfolioValuation {
    pub holdings: Vec<HoldingValuation>,
    pub summary: PortfolioSummary,
    pub valued_at: DateTime<Utc>,
}

impl PortfolioValuation {
    #[must_use]
    pub fn new(holdings: Vec<HoldingValuation>) -> Self {
        let summary = PortfolioSummary::from_valuations(&holdings);
        Self {
            holdings,
            summary,
            valued_at: Utc::now(),
        }
    }
}
