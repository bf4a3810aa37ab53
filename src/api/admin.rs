use alloy_primitives::U256;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{opt_amount, parse_address, present, ApiJson};
use crate::auth::AdminUser;
use crate::error::{ApiError, ApiResult};
use crate::events::{CreditApproved, Event, TokensMinted};
use crate::ledger::CreditRecord;
use crate::lending::DEFAULT_LOAN_VND;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBody {
    #[serde(default, deserialize_with = "opt_amount")]
    record_id: Option<u64>,
    #[serde(default, deserialize_with = "opt_amount")]
    final_loan_amount: Option<u64>,
    admin_notes: Option<String>,
}

pub async fn approve_credit(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiJson(body): ApiJson<ApproveBody>,
) -> ApiResult<Json<Value>> {
    let record_id = body
        .record_id
        .ok_or_else(|| ApiError::bad_request("Record ID is required"))?;
    if record_id >= state.ledger.record_count().await? {
        return Err(ApiError::NotFound("Record not found".into()));
    }
    if state.ledger.record(record_id).await?.approved {
        return Err(ApiError::bad_request("Credit already approved"));
    }

    let tx_hash = state.ledger.approve_credit(record_id).await?;
    let final_loan_amount = body.final_loan_amount.filter(|&v| v > 0).unwrap_or(DEFAULT_LOAN_VND);
    let admin_notes = present(&body.admin_notes).unwrap_or("Approved by admin").to_string();
    info!("Record {} approved by {} (tx {})", record_id, admin.username, tx_hash);

    state.events.publish(Event::CreditApproved(CreditApproved {
        record_id,
        final_loan_amount,
        admin_notes,
        tx_hash,
        approved_by: admin.username.clone(),
    }));

    Ok(Json(json!({
        "success": true,
        "recordId": record_id,
        "finalLoanAmount": final_loan_amount,
        "txHash": tx_hash,
        "message": "Credit approved successfully",
    })))
}

pub async fn pending_approvals(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<CreditRecord>>> {
    let pending = state
        .ledger
        .records()
        .await?
        .into_iter()
        .filter(|r| !r.approved)
        .collect();
    Ok(Json(pending))
}

#[derive(Debug, Deserialize)]
pub struct MintBody {
    recipient: Option<String>,
    #[serde(default, deserialize_with = "opt_amount")]
    amount: Option<u64>,
}

pub async fn mint_tokens(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiJson(body): ApiJson<MintBody>,
) -> ApiResult<Json<Value>> {
    let (Some(recipient), Some(amount)) =
        (present(&body.recipient), body.amount.filter(|&a| a > 0))
    else {
        return Err(ApiError::bad_request(
            "Valid recipient address and amount are required",
        ));
    };
    let recipient = parse_address(recipient, "recipient")?;

    let tx_hash = state.ledger.mint(recipient, U256::from(amount)).await?;
    info!("{} minted {} tokens to {} (tx {})", admin.username, amount, recipient, tx_hash);

    state.events.publish(Event::TokensMinted(TokensMinted {
        recipient,
        amount: amount.to_string(),
        tx_hash,
        minted_by: admin.username.clone(),
    }));

    Ok(Json(json!({
        "success": true,
        "recipient": recipient,
        "amount": amount,
        "txHash": tx_hash,
        "message": "Tokens minted successfully",
    })))
}
