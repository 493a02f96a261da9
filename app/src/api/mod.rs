use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, rejection::JsonRejection, rejection::QueryRejection},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use domain::{Envelope, PortfolioError};
use quote_adapter::QuoteError;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};
use utoipa::{OpenApi, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_swagger_ui::SwaggerUi;
use validator::{Validate, ValidationErrors};

use crate::config::PROJECT_NAME;
use crate::services::CelestaHandle;
use auth::BearerSecurity;

pub mod auth;
mod market;
mod portfolio;

const AUTH_TAG: &str = "auth";
const PORTFOLIO_TAG: &str = "portfolio";
const MARKET_TAG: &str = "market";

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
    ),
    components(
        schemas(
            auth::SignupRequest,
            auth::LoginRequest,
            auth::ChangePasswordRequest,
            portfolio::TradeRequest,
            market::BatchPriceRequest,
            Ack
        )
    ),
    modifiers(&BearerSecurity),
    tags(
        (name = AUTH_TAG, description = "Signup, login and account endpoints"),
        (name = PORTFOLIO_TAG, description = "Trading, holdings and valuation endpoints"),
        (name = MARKET_TAG, description = "Market data endpoints")
    )
)]
struct ApiDoc;

pub type AppState = CelestaHandle;

/// Error response carrying the HTTP status and the error envelope
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Envelope<()>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Envelope::error(code, message),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn from_quote(ticker: &str, error: &QuoteError) -> Self {
        match error {
            QuoteError::NotSupported(_) => {
                Self::new(StatusCode::BAD_REQUEST, "NOT_SUPPORTED", error.to_string())
            }
            QuoteError::Unavailable(_) => Self::new(
                StatusCode::BAD_GATEWAY,
                "PRICE_UNAVAILABLE",
                format!("Could not fetch price for {ticker}: {error}"),
            ),
        }
    }
}

impl From<PortfolioError> for ApiError {
    fn from(error: PortfolioError) -> Self {
        let status = match &error {
            PortfolioError::Validation(_)
            | PortfolioError::InvalidQuantity(_)
            | PortfolioError::InsufficientQuantity { .. } => StatusCode::BAD_REQUEST,
            PortfolioError::Conflict(_) => StatusCode::CONFLICT,
            PortfolioError::NotFound(_) => StatusCode::NOT_FOUND,
            PortfolioError::PriceUnavailable { .. } => StatusCode::BAD_GATEWAY,
            PortfolioError::Unauthenticated => StatusCode::UNAUTHORIZED,
            PortfolioError::Storage(e) => {
                error!("Storage failure while serving request: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            body: error.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        Self::validation(errors.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("Request failed with {}", self.status);
        }
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope::ok(data)))
}

/// JSON body extractor whose rejections use the error envelope
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor whose rejections use the error envelope
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Runs the `validator` rules of a request body
pub fn validated<T: Validate>(payload: T) -> Result<T, ApiError> {
    payload.validate()?;
    Ok(payload)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Ack {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub name: String,
    pub version: String,
    pub status: String,
}

/// Get health of the API.
#[utoipa::path(
    method(get, head),
    path = "/api/health",
    responses(
        (status = OK, description = "Success", body = Envelope<HealthStatus>)
    )
)]
async fn health() -> ApiResult<HealthStatus> {
    ok(HealthStatus {
        name: PROJECT_NAME.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
    })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{origin}'");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

pub fn create_api(state: AppState, cors_origins: &[String]) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(health))
        .nest("/api/auth", auth::router(state.clone()))
        .nest("/api/portfolio", portfolio::router(state.clone()))
        .nest("/api/market", market::router(state.clone()))
        .split_for_parts();

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/apidoc/openapi.json", api))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::{
        Router,
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use domain::{Celesta, EngineConfig};
    use http_body_util::BodyExt;
    use quote_adapter::FixedQuoteProvider;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::auth::JwtKeys;
    use crate::services::CelestaHandle;

    pub fn test_state() -> (CelestaHandle, Arc<FixedQuoteProvider>) {
        let quotes = Arc::new(FixedQuoteProvider::with_demo_prices());
        let celesta = Celesta::in_memory(quotes.clone(), EngineConfig::default());
        (
            CelestaHandle::new(celesta, JwtKeys::new("test-secret")),
            quotes,
        )
    }

    pub fn test_app(state: &CelestaHandle) -> Router {
        super::create_api(state.clone(), &[])
    }

    pub async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Signs a user up and returns its bearer token
    pub async fn signup(app: &Router, username: &str) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/auth/signup",
            None,
            Some(serde_json::json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": "secret1",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["token"].as_str().unwrap().to_string()
    }
}
