//! HTTP surface: routing, middleware and the request/response plumbing
//! shared by the handlers.

pub mod account;
pub mod admin;
pub mod ratelimit;
pub mod records;
pub mod system;
pub mod tokens;

use std::future::Future;
use std::net::SocketAddr;

use alloy_primitives::{Address, B256};
use anyhow::Context;
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::AppState;

/// `axum::Json` with failures rendered as `{"error": ...}`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(account::register))
        .route("/login", post(account::login))
        .route("/me", get(account::me))
        .route("/link-wallet", post(account::link_wallet))
        .route("/evaluate", post(records::evaluate))
        .route("/create-record", post(records::create_record))
        .route("/user-records", get(records::user_records))
        .route("/records/:id", get(records::record_by_id))
        .route("/progress-tracker", get(records::progress_tracker))
        .route("/esg-analytics", get(records::esg_analytics))
        .route("/user-stats", get(records::user_stats))
        .route("/token-balance", post(tokens::token_balance))
        .route("/wallet-details", post(tokens::wallet_details))
        .route("/redeem-token", post(tokens::redeem_token))
        .route("/transfer-tokens", post(tokens::transfer_tokens))
        .route("/transaction-status/:tx_hash", get(tokens::transaction_status))
        .route("/mint-tokens", post(admin::mint_tokens))
        .route("/approve-credit", post(admin::approve_credit))
        .route("/pending-approvals", get(admin::pending_approvals))
        .route("/health", get(system::health))
        .route("/webhook", post(system::webhook))
        .route("/ws", get(system::ws))
        .layer(from_fn_with_state(state.clone(), ratelimit::limit))
        .layer(cors_layer(&state.settings.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `*` allows any origin (without credentials); otherwise the listed
/// origins with credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        warn!("CORS allows any origin");
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(origins).allow_credentials(true)
}

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Backend listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}

/// 2^64, the first float that no longer fits a u64.
const U64_LIMIT: f64 = 18_446_744_073_709_551_616.0;

/// Accepts a JSON number or numeric string, truncated toward zero.
/// Negative or unparsable values read as absent; values past `u64::MAX`
/// are rejected.
pub fn opt_amount<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    let from_float = |f: f64| -> Result<Option<u64>, D::Error> {
        if !f.is_finite() || f < 0.0 {
            return Ok(None);
        }
        if f >= U64_LIMIT {
            return Err(D::Error::custom(format!("amount {f} is out of range")));
        }
        Ok(Some(f.trunc() as u64))
    };
    match value {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(v) => Ok(Some(v)),
            None => n.as_f64().map_or(Ok(None), from_float),
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.parse::<u64>() {
                Ok(v) => Ok(Some(v)),
                Err(_) => s.parse::<f64>().map_or(Ok(None), from_float),
            }
        }
        _ => Ok(None),
    }
}

/// Non-blank string field.
pub fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn parse_address(s: &str, field: &str) -> Result<Address, ApiError> {
    s.trim()
        .parse::<Address>()
        .map_err(|_| ApiError::bad_request(format!("Invalid {field}")))
}

pub fn parse_tx_hash(s: &str) -> Result<B256, ApiError> {
    s.trim()
        .parse::<B256>()
        .map_err(|_| ApiError::bad_request("Invalid transaction hash"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Body {
        #[serde(default, deserialize_with = "opt_amount")]
        amount: Option<u64>,
    }

    fn amount(json: &str) -> Option<u64> {
        serde_json::from_str::<Body>(json).unwrap().amount
    }

    #[test]
    fn test_opt_amount() {
        assert_eq!(amount(r#"{"amount": 100}"#), Some(100));
        assert_eq!(amount(r#"{"amount": 72.9}"#), Some(72));
        assert_eq!(amount(r#"{"amount": "250"}"#), Some(250));
        assert_eq!(amount(r#"{"amount": " 3.5 "}"#), Some(3));
        assert_eq!(amount(r#"{"amount": -5}"#), None);
        assert_eq!(amount(r#"{"amount": "abc"}"#), None);
        assert_eq!(amount(r#"{"amount": null}"#), None);
        assert_eq!(amount(r#"{}"#), None);
        assert_eq!(amount(r#"{"amount": 18446744073709551615}"#), Some(u64::MAX));
    }

    #[test]
    fn test_opt_amount_rejects_out_of_range() {
        assert!(serde_json::from_str::<Body>(r#"{"amount": 1e30}"#).is_err());
        assert!(serde_json::from_str::<Body>(r#"{"amount": 18446744073709551616}"#).is_err());
        assert!(serde_json::from_str::<Body>(r#"{"amount": "99999999999999999999999"}"#).is_err());
    }

    #[test]
    fn test_parse_helpers() {
        assert!(parse_address("0xD55420276e2C9E6000f922fA658D222b34E989f5", "recipient").is_ok());
        let err = parse_address("0x123", "recipient").unwrap_err();
        assert_eq!(err.to_string(), "Invalid recipient");
        assert!(parse_tx_hash(&format!("0x{}", "ab".repeat(32))).is_ok());
        assert!(parse_tx_hash("0xdead").is_err());
        assert_eq!(present(&Some("  ".into())), None);
        assert_eq!(present(&Some(" x ".into())), Some("x"));
    }
}
