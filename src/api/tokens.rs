use alloy_primitives::{Address, B256};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{opt_amount, parse_address, parse_tx_hash, present, ApiJson, ApiPath};
use crate::auth::AuthUser;
use crate::confirmation::{self, StatusReport};
use crate::error::{ApiError, ApiResult};
use crate::events::{Event, TokenRedeemed, TokensTransferred};
use crate::ledger::{to_u64, CreditLedger};
use crate::lending::{self, QuoteInput, QuoteView};
use crate::users::User;
use crate::AppState;

pub const WALLET_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBody {
    wallet_address: Option<String>,
}

/// Wallet named in the body, else the one linked to the account.
fn resolve_wallet(body: Option<&String>, user: &User) -> ApiResult<Address> {
    match body.map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(raw) => parse_address(raw, "walletAddress"),
        None => user
            .wallet_address
            .ok_or_else(|| ApiError::bad_request("walletAddress is required")),
    }
}

pub async fn token_balance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<WalletBody>,
) -> ApiResult<Json<Value>> {
    let wallet = resolve_wallet(body.wallet_address.as_ref(), &user)?;
    let balance = state.ledger.balance_of(wallet).await?;
    Ok(Json(json!({
        "totalBalance": to_u64(balance),
        "rawBalance": balance.to_string(),
    })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    kind: &'static str,
    record_id: u64,
    amount: u64,
    timestamp: i64,
    description: String,
    esg_score: u64,
    status: &'static str,
}

pub async fn wallet_details(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<WalletBody>,
) -> ApiResult<Json<Value>> {
    let wallet = resolve_wallet(body.wallet_address.as_ref(), &user)?;
    let balance = state.ledger.balance_of(wallet).await?;
    let stats = state.ledger.user_stats(wallet).await?;

    let mut history: Vec<HistoryEntry> = state
        .ledger
        .records()
        .await?
        .into_iter()
        .filter(|r| r.user == wallet)
        .map(|r| HistoryEntry {
            kind: "record_created",
            record_id: r.id,
            amount: r.credit_amount,
            timestamp: r.timestamp,
            description: r.project_description,
            esg_score: r.esg_score,
            status: if r.approved { "approved" } else { "pending" },
        })
        .collect();
    history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.record_id.cmp(&a.record_id)));
    history.truncate(WALLET_HISTORY_LIMIT);

    Ok(Json(json!({
        "walletAddress": wallet,
        "balance": to_u64(balance),
        "totalRecords": stats.total_records,
        "totalTokens": stats.total_tokens,
        "redeemedAmount": stats.redeemed_amount,
        "lastRedemption": stats.last_redemption,
        "transactionHistory": history,
    })))
}

/// Reject unknown or reverted transactions submitted by a client.
async fn verify_submitted(ledger: &dyn CreditLedger, tx_hash: B256) -> ApiResult<()> {
    match ledger.receipt(tx_hash).await? {
        None => Err(ApiError::bad_request("Transaction not found or still pending")),
        Some(r) if !r.success => Err(ApiError::bad_request("Transaction failed on-chain")),
        Some(_) => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemBody {
    wallet_address: Option<String>,
    #[serde(default, deserialize_with = "opt_amount")]
    amount: Option<u64>,
    #[serde(default, deserialize_with = "opt_amount")]
    loan_amount: Option<u64>,
    #[serde(default, deserialize_with = "opt_amount")]
    esg_score: Option<u64>,
    tx_hash: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    success: bool,
    #[serde(flatten)]
    quote: QuoteView,
    bank_offer: &'static str,
    message: &'static str,
    tx_hash: B256,
}

pub async fn redeem_token(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<RedeemBody>,
) -> ApiResult<Json<RedeemResponse>> {
    let (Some(amount), Some(raw_hash)) =
        (body.amount.filter(|&a| a > 0), present(&body.tx_hash))
    else {
        return Err(ApiError::bad_request("Valid amount and txHash are required"));
    };
    let tx_hash = parse_tx_hash(raw_hash)?;
    verify_submitted(state.ledger.as_ref(), tx_hash).await?;

    // The balance only scales the quote; without one the multiplier stays neutral.
    let wallet = present(&body.wallet_address)
        .and_then(|s| s.parse::<Address>().ok())
        .or(user.wallet_address);
    let balance = match wallet {
        Some(w) => match state.ledger.balance_of(w).await {
            Ok(b) => Some(to_u64(b)),
            Err(e) => {
                warn!("Balance lookup for {} failed: {:#}", w, e);
                None
            }
        },
        None => None,
    };

    let quote = lending::quote(QuoteInput {
        tokens: amount,
        requested_loan: body.loan_amount,
        esg: body.esg_score,
        balance,
    })
    .view();
    info!(
        "{} redeemed {} tokens: {}, {}",
        user.username, amount, quote.discount, quote.loan_amount
    );

    state.events.publish(Event::TokenRedeemed(TokenRedeemed {
        user: user.username.clone(),
        amount,
        discount: quote.discount.clone(),
        loan_amount: quote.loan_amount.clone(),
        tx_hash,
    }));

    Ok(Json(RedeemResponse {
        success: true,
        quote,
        bank_offer: lending::bank_discount(amount),
        message: "Tokens redeemed successfully!",
        tx_hash,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBody {
    recipient: Option<String>,
    #[serde(default, deserialize_with = "opt_amount")]
    amount: Option<u64>,
    tx_hash: Option<String>,
}

pub async fn transfer_tokens(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<TransferBody>,
) -> ApiResult<Json<Value>> {
    let (Some(recipient), Some(amount), Some(raw_hash)) = (
        present(&body.recipient),
        body.amount.filter(|&a| a > 0),
        present(&body.tx_hash),
    ) else {
        return Err(ApiError::bad_request("Recipient, amount and txHash are required"));
    };
    let recipient = parse_address(recipient, "recipient")?;
    let tx_hash = parse_tx_hash(raw_hash)?;
    verify_submitted(state.ledger.as_ref(), tx_hash).await?;

    state.events.publish(Event::TokensTransferred(TokensTransferred {
        from: user.username.clone(),
        recipient,
        amount: amount.to_string(),
        tx_hash,
    }));

    Ok(Json(json!({
        "success": true,
        "recipient": recipient,
        "amount": amount,
        "txHash": tx_hash,
        "message": "Tokens transferred and verified successfully",
    })))
}

pub async fn transaction_status(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(tx_hash): ApiPath<String>,
) -> ApiResult<Json<StatusReport>> {
    let tx_hash = parse_tx_hash(&tx_hash)?;
    Ok(Json(confirmation::transaction_status(state.ledger.as_ref(), tx_hash).await?))
}
