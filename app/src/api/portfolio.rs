use axum::extract::State;
use domain::{
    AssetClass, Envelope, Snapshot, TradeReceipt, Transaction,
    portfolio::{HoldingValuation, PortfolioSummary},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use validator::Validate;

use super::auth::AuthUser;
use super::{ApiJson, ApiQuery, ApiResult, AppState, ok, validated};

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct TradeRequest {
    #[validate(length(min = 1, max = 20, message = "ticker is required"))]
    pub ticker: String,
    #[serde(alias = "asset_class")]
    pub asset_type: AssetClass,
    /// Units to trade, fractional amounts allowed
    pub quantity: f64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TransactionsQuery {
    /// Defaults to 50, clamped to 1..=1000
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Trailing window in hours, defaults to 24
    pub hours: Option<i64>,
}

pub fn router(state: AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .with_state(state)
        .routes(routes!(buy))
        .routes(routes!(sell))
        .routes(routes!(get_holdings))
        .routes(routes!(get_transactions))
        .routes(routes!(get_value_history))
        .routes(routes!(get_summary))
        .routes(routes!(record_snapshot))
}

/// Buy an asset at the current market price
#[utoipa::path(
    post,
    path = "/buy",
    request_body = TradeRequest,
    responses(
        (status = 200, description = "Trade applied", body = Envelope<TradeReceipt>),
        (status = 400, description = "Invalid ticker or quantity"),
        (status = 502, description = "Price unavailable, nothing was recorded")
    ),
    security(("bearer" = [])),
    tag = super::PORTFOLIO_TAG
)]
async fn buy(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(payload): ApiJson<TradeRequest>,
) -> ApiResult<TradeReceipt> {
    let payload = validated(payload)?;
    ok(state
        .celesta()
        .engine()
        .buy(
            user_id,
            &payload.ticker,
            payload.asset_type,
            payload.quantity,
        )
        .await?)
}

/// Sell an asset at the current market price
#[utoipa::path(
    post,
    path = "/sell",
    request_body = TradeRequest,
    responses(
        (status = 200, description = "Trade applied", body = Envelope<TradeReceipt>),
        (status = 400, description = "Invalid quantity or more than is held"),
        (status = 404, description = "No holding for this ticker"),
        (status = 502, description = "Price unavailable, nothing was recorded")
    ),
    security(("bearer" = [])),
    tag = super::PORTFOLIO_TAG
)]
async fn sell(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(payload): ApiJson<TradeRequest>,
) -> ApiResult<TradeReceipt> {
    let payload = validated(payload)?;
    ok(state
        .celesta()
        .engine()
        .sell(
            user_id,
            &payload.ticker,
            payload.asset_type,
            payload.quantity,
        )
        .await?)
}

/// Holdings with live valuation
///
/// A holding whose price cannot be fetched is returned with a zero value
/// and a `price_error`.
#[utoipa::path(
    get,
    path = "/holdings",
    responses((status = 200, body = Envelope<Vec<HoldingValuation>>)),
    security(("bearer" = [])),
    tag = super::PORTFOLIO_TAG
)]
async fn get_holdings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Vec<HoldingValuation>> {
    ok(state.celesta().engine().get_holdings(user_id).await?)
}

/// Transaction history, newest first
#[utoipa::path(
    get,
    path = "/transactions",
    params(TransactionsQuery),
    responses((status = 200, body = Envelope<Vec<Transaction>>)),
    security(("bearer" = [])),
    tag = super::PORTFOLIO_TAG
)]
async fn get_transactions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(query): ApiQuery<TransactionsQuery>,
) -> ApiResult<Vec<Transaction>> {
    ok(state
        .celesta()
        .engine()
        .get_transactions(user_id, query.limit)
        .await?)
}

/// Portfolio value snapshots in a trailing window, oldest first
#[utoipa::path(
    get,
    path = "/value-history",
    params(HistoryQuery),
    responses((status = 200, body = Envelope<Vec<Snapshot>>)),
    security(("bearer" = [])),
    tag = super::PORTFOLIO_TAG
)]
async fn get_value_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> ApiResult<Vec<Snapshot>> {
    ok(state.celesta().snapshots().list(user_id, query.hours).await?)
}

/// Portfolio totals, rounded to cents
#[utoipa::path(
    get,
    path = "/summary",
    responses((status = 200, body = Envelope<PortfolioSummary>)),
    security(("bearer" = [])),
    tag = super::PORTFOLIO_TAG
)]
async fn get_summary(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<PortfolioSummary> {
    let summary = state.celesta().engine().get_summary(user_id).await?;
    ok(summary.rounded())
}

/// Record a value snapshot now
#[utoipa::path(
    post,
    path = "/snapshot",
    responses((status = 200, body = Envelope<Snapshot>)),
    security(("bearer" = [])),
    tag = super::PORTFOLIO_TAG
)]
async fn record_snapshot(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Snapshot> {
    ok(state.celesta().snapshots().record(user_id).await?)
}
