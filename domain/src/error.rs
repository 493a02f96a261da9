use std::fmt;

use database_adapter::DbError;
use quote_adapter::QuoteError;

/// Errors surfaced by every core operation
#[derive(Debug)]
pub enum PortfolioError {
    /// Malformed input: empty ticker, weak password, bad email...
    Validation(String),
    InvalidQuantity(f64),
    Conflict(String),
    NotFound(String),
    InsufficientQuantity {
        ticker: String,
        held: f64,
        requested: f64,
    },
    PriceUnavailable {
        ticker: String,
        reason: String,
    },
    Unauthenticated,
    Storage(DbError),
}

impl PortfolioError {
    /// Stable machine-readable code carried in the response envelope
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            PortfolioError::Validation(_) => "VALIDATION_ERROR",
            PortfolioError::InvalidQuantity(_) => "INVALID_QUANTITY",
            PortfolioError::Conflict(_) => "CONFLICT",
            PortfolioError::NotFound(_) => "NOT_FOUND",
            PortfolioError::InsufficientQuantity { .. } => "INSUFFICIENT_QUANTITY",
            PortfolioError::PriceUnavailable { .. } => "PRICE_UNAVAILABLE",
            PortfolioError::Unauthenticated => "UNAUTHENTICATED",
            PortfolioError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub(crate) fn price_unavailable(ticker: &str, error: &QuoteError) -> Self {
        PortfolioError::PriceUnavailable {
            ticker: ticker.to_string(),
            reason: error.to_string(),
        }
    }
}

impl fmt::Display for PortfolioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortfolioError::Validation(reason) => write!(f, "Validation error: {reason}"),
            PortfolioError::InvalidQuantity(quantity) => {
                write!(f, "Invalid quantity {quantity}: must be greater than 0")
            }
            PortfolioError::Conflict(reason) => write!(f, "Conflict: {reason}"),
            PortfolioError::NotFound(what) => write!(f, "Not found: {what}"),
            PortfolioError::InsufficientQuantity {
                ticker,
                held,
                requested,
            } => write!(
                f,
                "Insufficient quantity of {ticker}: requested {requested}, held {held}"
            ),
            PortfolioError::PriceUnavailable { ticker, reason } => {
                write!(f, "Could not fetch price for {ticker}: {reason}")
            }
            PortfolioError::Unauthenticated => write!(f, "Not authenticated"),
            PortfolioError::Storage(e) => write!(f, "Storage error: {e}"),
        }
    }
}

impl std::error::Error for PortfolioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PortfolioError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for PortfolioError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::Conflict(reason) => PortfolioError::Conflict(reason),
            DbError::NotFound(what) => PortfolioError::NotFound(what),
            DbError::InsufficientQuantity { held, requested } => {
                PortfolioError::InsufficientQuantity {
                    ticker: String::new(),
                    held,
                    requested,
                }
            }
            DbError::InvalidInput(reason) => PortfolioError::Validation(reason),
            other => PortfolioError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_the_taxonomy() {
        let conflict: PortfolioError = DbError::Conflict("users_email_key".into()).into();
        assert_eq!(conflict.code(), "CONFLICT");

        let oversell: PortfolioError = DbError::InsufficientQuantity {
            held: 1.0,
            requested: 2.0,
        }
        .into();
        assert_eq!(oversell.code(), "INSUFFICIENT_QUANTITY");

        let corrupt: PortfolioError = DbError::Corrupt("bad side".into()).into();
        assert_eq!(corrupt.code(), "STORAGE_ERROR");
        assert!(std::error::Error::source(&corrupt).is_some());
    }

    #[test]
    fn quote_failures_name_the_ticker() {
        let err = PortfolioError::price_unavailable(
            "BTC",
            &QuoteError::Unavailable("timeout".to_string()),
        );
        assert_eq!(err.code(), "PRICE_UNAVAILABLE");
        assert!(err.to_string().contains("BTC"));
    }
}
