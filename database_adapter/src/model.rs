use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

pub use quote_adapter::AssetClass;

use crate::db::DbError;

pub type UserId = Uuid;
pub type TransactionId = Uuid;
pub type SnapshotId = Uuid;

/// Quantities closer to zero than this are treated as zero. Guards the
/// "no zero-quantity holding" rule against floating point dust.
pub const QUANTITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRecord {
    #[schema(value_type = String, format = Uuid)]
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeSide {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => Err(DbError::Corrupt(format!("unknown trade side '{other}'"))),
        }
    }
}

/// Current position of a user in one ticker. Never stored with a zero quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Holding {
    #[schema(value_type = String, format = Uuid)]
    pub user_id: UserId,
    pub ticker: String,
    pub asset_class: AssetClass,
    pub quantity: f64,
    pub average_buy_price: f64,
    pub updated_at: DateTime<Utc>,
}

impl Holding {
    /// Amount paid for the current position at the average price
    #[must_use]
    pub fn cost_basis(&self) -> f64 {
        self.average_buy_price * self.quantity
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub ticker: String,
    pub asset_class: AssetClass,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
}

impl NewTransaction {
    /// Signed change this trade applies to the holding quantity
    #[must_use]
    pub fn delta_quantity(&self) -> f64 {
        match self.side {
            TradeSide::Buy => self.quantity,
            TradeSide::Sell => -self.quantity,
        }
    }

    /// # Errors
    /// Returns `DbError::InvalidInput` unless quantity and price are finite and positive
    pub fn validate(&self) -> Result<(), DbError> {
        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            return Err(DbError::InvalidInput(format!(
                "transaction quantity must be positive, got {}",
                self.quantity
            )));
        }
        if !(self.price.is_finite() && self.price > 0.0) {
            return Err(DbError::InvalidInput(format!(
                "transaction price must be positive, got {}",
                self.price
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn into_transaction(self, id: TransactionId, timestamp: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            ticker: self.ticker,
            asset_class: self.asset_class,
            side: self.side,
            quantity: self.quantity,
            price: self.price,
            timestamp,
        }
    }
}

/// Append-only trade record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    #[schema(value_type = String, format = Uuid)]
    pub id: TransactionId,
    #[schema(value_type = String, format = Uuid)]
    pub user_id: UserId,
    pub ticker: String,
    pub asset_class: AssetClass,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.quantity * self.price
    }
}

/// Point-in-time total portfolio value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Snapshot {
    #[schema(value_type = String, format = Uuid)]
    pub id: SnapshotId,
    #[schema(value_type = String, format = Uuid)]
    pub user_id: UserId,
    pub total_value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Result of applying one trade: the holding after the trade (`None` once
/// liquidated) and the transaction that was appended.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTrade {
    pub holding: Option<Holding>,
    pub transaction: Transaction,
}

/// Quantity-weighted average of the existing position and a new acquisition
#[must_use]
pub fn weighted_average(existing_qty: f64, existing_avg: f64, delta: f64, price: f64) -> f64 {
    (existing_avg * existing_qty + price * delta) / (existing_qty + delta)
}

/// What a store must do to a holding row
#[derive(Debug, Clone, PartialEq)]
pub enum HoldingUpdate {
    Upsert(Holding),
    Remove,
}

/// Computes the next state of a holding for a signed quantity change.
///
/// Buys blend the average price; sells leave it untouched and remove the row
/// when nothing is left. Both store implementations go through this so the
/// arithmetic lives in one place.
///
/// # Errors
/// - `InvalidInput` for a zero or non-finite delta, or a buy without a positive price
/// - `NotFound` when selling a holding that does not exist
/// - `InsufficientQuantity` when selling more than is held
pub fn plan_holding_update(
    existing: Option<&Holding>,
    user_id: UserId,
    ticker: &str,
    asset_class: AssetClass,
    delta_quantity: f64,
    trade_price: f64,
    now: DateTime<Utc>,
) -> Result<HoldingUpdate, DbError> {
    if !delta_quantity.is_finite() || delta_quantity == 0.0 {
        return Err(DbError::InvalidInput(format!(
            "quantity change must be non-zero, got {delta_quantity}"
        )));
    }

    if delta_quantity > 0.0 {
        if !(trade_price.is_finite() && trade_price > 0.0) {
            return Err(DbError::InvalidInput(format!(
                "trade price must be positive, got {trade_price}"
            )));
        }
        let holding = match existing {
            Some(current) => Holding {
                quantity: current.quantity + delta_quantity,
                average_buy_price: weighted_average(
                    current.quantity,
                    current.average_buy_price,
                    delta_quantity,
                    trade_price,
                ),
                updated_at: now,
                ..current.clone()
            },
            None => Holding {
                user_id,
                ticker: ticker.to_string(),
                asset_class,
                quantity: delta_quantity,
                average_buy_price: trade_price,
                updated_at: now,
            },
        };
        return Ok(HoldingUpdate::Upsert(holding));
    }

    let requested = -delta_quantity;
    let Some(current) = existing else {
        return Err(DbError::NotFound(format!("no {ticker} holding for user {user_id}")));
    };
    if requested > current.quantity {
        return Err(DbError::InsufficientQuantity {
            held: current.quantity,
            requested,
        });
    }

    let remaining = current.quantity - requested;
    if remaining <= QUANTITY_EPSILON {
        Ok(HoldingUpdate::Remove)
    } else {
        Ok(HoldingUpdate::Upsert(Holding {
            quantity: remaining,
            updated_at: now,
            ..current.clone()
        }))
    }
}
