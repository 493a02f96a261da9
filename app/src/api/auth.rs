use std::fmt;
use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{StatusCode, header, request::Parts},
};
use chrono::{Duration, Utc};
use database_adapter::model::UserRecord;
use domain::{Envelope, PortfolioError, UserId};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::{
    Modify, ToSchema,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use uuid::Uuid;
use validator::Validate;

use super::{Ack, ApiError, ApiJson, ApiResult, AppState, ok, validated};

const TOKEN_LIFETIME_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

/// HMAC secret used to sign and verify bearer tokens
#[derive(Clone)]
pub struct JwtKeys {
    secret: Arc<[u8]>,
}

impl fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtKeys").finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret.as_bytes()),
        }
    }

    /// Generate a token for the given user, valid for 24 hours
    pub fn issue(
        &self,
        user_id: UserId,
        username: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            exp: (now + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
    }

    /// Verify and decode a token
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::default(),
        )
        .map(|data| data.claims)
    }
}

/// Identity of the caller, taken from a valid `Authorization: Bearer` token
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(PortfolioError::Unauthenticated)?;

        let claims = state.jwt().verify(token.trim()).map_err(|e| {
            debug!("Rejected bearer token: {e}");
            PortfolioError::Unauthenticated
        })?;
        let user_id =
            Uuid::parse_str(&claims.sub).map_err(|_| PortfolioError::Unauthenticated)?;

        // The account may have been removed since the token was issued
        match state.celesta().users().get(user_id).await {
            Ok(_) => Ok(AuthUser(user_id)),
            Err(PortfolioError::NotFound(_)) => Err(PortfolioError::Unauthenticated.into()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Adds the bearer scheme to the OpenAPI document
pub struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 64, message = "username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct LoginRequest {
    /// Username or email
    #[validate(length(min = 1, message = "username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "current password is required"))]
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserRecord,
}

fn auth_response(state: &AppState, user: UserRecord) -> Result<AuthResponse, ApiError> {
    let token = state
        .jwt()
        .issue(user.id, &user.username)
        .map_err(|e| ApiError::internal(format!("could not issue token: {e}")))?;
    Ok(AuthResponse {
        token,
        token_type: "Bearer".to_string(),
        expires_in: TOKEN_LIFETIME_HOURS * 3600,
        user,
    })
}

pub fn router(state: AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .with_state(state)
        .routes(routes!(signup))
        .routes(routes!(login))
        .routes(routes!(me))
        .routes(routes!(change_password))
}

/// Create an account
///
/// Registers the user and returns a bearer token, so signup also logs in.
#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created", body = Envelope<AuthResponse>),
        (status = 400, description = "Missing field, malformed email or weak password"),
        (status = 409, description = "Username or email already taken")
    ),
    tag = super::AUTH_TAG
)]
async fn signup(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SignupRequest>,
) -> Result<(StatusCode, Json<Envelope<AuthResponse>>), ApiError> {
    let payload = validated(payload)?;
    let users = state.celesta().users();
    let user_id = users
        .signup(&payload.username, &payload.email, &payload.password)
        .await?;
    let user = users.get(user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(auth_response(&state, user)?)),
    ))
}

/// Log in
///
/// Accepts a username or an email with the password.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = Envelope<AuthResponse>),
        (status = 401, description = "Invalid credentials")
    ),
    tag = super::AUTH_TAG
)]
async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> ApiResult<AuthResponse> {
    let payload = validated(payload)?;
    let user = state
        .celesta()
        .users()
        .authenticate(&payload.username, &payload.password)
        .await?;
    ok(auth_response(&state, user)?)
}

/// Current user
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Authenticated user", body = Envelope<UserRecord>),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer" = [])),
    tag = super::AUTH_TAG
)]
async fn me(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> ApiResult<UserRecord> {
    ok(state.celesta().users().get(user_id).await?)
}

/// Change password
#[utoipa::path(
    put,
    path = "/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = Envelope<Ack>),
        (status = 400, description = "New password too weak"),
        (status = 401, description = "Wrong current password or invalid token")
    ),
    security(("bearer" = [])),
    tag = super::AUTH_TAG
)]
async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Ack> {
    let payload = validated(payload)?;
    state
        .celesta()
        .users()
        .change_password(user_id, &payload.current_password, &payload.new_password)
        .await?;
    ok(Ack {
        message: "Password updated".to_string(),
    })
}

#[cfg(test)]
mod tests;
