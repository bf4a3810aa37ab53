use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{present, ApiJson};
use crate::auth::{self, AuthResponse, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::users::{self, User};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterBody>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let (Some(username), Some(email), Some(password)) = (
        present(&body.username),
        present(&body.email),
        body.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("All fields are required"));
    };
    let resp = auth::register(state.users.as_ref(), &state.jwt, username, email, password).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    email: Option<String>,
    password: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginBody>,
) -> ApiResult<Json<AuthResponse>> {
    let (Some(email), Some(password)) = (
        present(&body.email),
        body.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Email and password are required"));
    };
    let resp = auth::login(state.users.as_ref(), &state.jwt, email, password).await?;
    Ok(Json(resp))
}

pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkWalletBody {
    wallet_address: Option<String>,
}

pub async fn link_wallet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<LinkWalletBody>,
) -> ApiResult<Json<Value>> {
    let raw = present(&body.wallet_address)
        .ok_or_else(|| ApiError::bad_request("walletAddress is required"))?;
    let wallet = users::parse_wallet(raw)?;
    let updated = state.users.set_wallet(&user.id, wallet).await?;
    info!("User {} linked wallet {}", updated.username, wallet);
    Ok(Json(json!({
        "success": true,
        "walletAddress": wallet,
        "message": "Wallet linked successfully",
    })))
}
