use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PortfolioError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Uniform `{success, data?, error?}` result body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

impl<T> From<PortfolioError> for Envelope<T> {
    fn from(error: PortfolioError) -> Self {
        Self::error(error.code(), error.to_string())
    }
}

impl<T> From<Result<T, PortfolioError>> for Envelope<T> {
    fn from(result: Result<T, PortfolioError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_omits_error() {
        let body = serde_json::to_string(&Envelope::ok(3)).unwrap();
        assert!(body.contains("\"success\":true"));
        assert!(!body.contains("error"));
    }

    #[test]
    fn failure_carries_code() {
        let envelope: Envelope<()> = PortfolioError::InvalidQuantity(-1.0).into();
        assert!(!envelope.success);
        assert_eq!(envelope.error.unwrap().code, "INVALID_QUANTITY");
    }
}
