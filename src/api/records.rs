use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{opt_amount, present, ApiJson, ApiPath, ApiQuery};
use crate::analytics::{self, AnalyticsFilter, AnalyticsQuery, RecordView};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::events::{Event, RecordCreated, TxStatus};
use crate::ledger::{CreditRecord, NewCredit};
use crate::scoring::EsgInput;
use crate::users::LoanRecord;
use crate::AppState;

pub const DEFAULT_DESCRIPTION: &str = "ESG Project";

pub async fn evaluate(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiJson(input): ApiJson<EsgInput>,
) -> ApiResult<Json<Value>> {
    let features = input.into_features(state.settings.usd_to_vnd_rate)?;
    let prediction = state.scorer.score(&features).await?;
    Ok(Json(json!({ "result": prediction, "error": null })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordBody {
    #[serde(default, deserialize_with = "opt_amount")]
    esg_score: Option<u64>,
    #[serde(default, deserialize_with = "opt_amount")]
    credit_amount: Option<u64>,
    project_description: Option<String>,
    #[serde(default, deserialize_with = "opt_amount")]
    loan_amount: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordResponse {
    success: bool,
    record_id: Option<u64>,
    tx_hash: alloy_primitives::B256,
    status: TxStatus,
    message: &'static str,
    data: CreditData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditData {
    esg_score: u64,
    credit_amount: u64,
    project_description: String,
    loan_amount: u64,
}

pub async fn create_record(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<CreateRecordBody>,
) -> ApiResult<Json<CreateRecordResponse>> {
    let (Some(esg_score), Some(credit_amount)) = (
        body.esg_score.filter(|&v| v > 0),
        body.credit_amount.filter(|&v| v > 0),
    ) else {
        return Err(ApiError::bad_request(
            "Missing required fields: esgScore and creditAmount",
        ));
    };
    let project_description = present(&body.project_description)
        .unwrap_or(DEFAULT_DESCRIPTION)
        .to_string();
    let loan_amount = body.loan_amount.filter(|&v| v > 0).unwrap_or(credit_amount);

    let submission = state
        .ledger
        .add_record(NewCredit {
            esg_score,
            credit_amount,
            project_description: project_description.clone(),
            loan_amount,
        })
        .await?;
    info!(
        "Record {:?} created by {} (tx {})",
        submission.record_id, user.username, submission.tx_hash
    );

    state.events.publish(Event::RecordCreated(RecordCreated {
        record_id: submission.record_id,
        user: user.username.clone(),
        esg_score,
        credit_amount,
        project_description: project_description.clone(),
        loan_amount,
        tx_hash: submission.tx_hash,
        status: TxStatus::Pending,
    }));
    state.watcher.watch(submission.tx_hash, Some(esg_score));

    // The chain write already happened; a profile update failure is only logged.
    let loan = LoanRecord {
        project_description: project_description.clone(),
        loan_amount,
        timestamp: Utc::now().timestamp(),
    };
    if let Err(e) = state.users.record_loan(&user.id, esg_score, credit_amount, loan).await {
        warn!("Failed to store loan record for {}: {}", user.id, e);
    }

    Ok(Json(CreateRecordResponse {
        success: true,
        record_id: submission.record_id,
        tx_hash: submission.tx_hash,
        status: TxStatus::Pending,
        message: "Record created successfully and is pending confirmation",
        data: CreditData {
            esg_score,
            credit_amount,
            project_description,
            loan_amount,
        },
    }))
}

pub async fn user_records(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Json<Vec<CreditRecord>>> {
    Ok(Json(state.ledger.records().await?))
}

pub async fn record_by_id(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<CreditRecord>> {
    let id: u64 = id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid record id"))?;
    if id >= state.ledger.record_count().await? {
        return Err(ApiError::NotFound("Record not found".into()));
    }
    Ok(Json(state.ledger.record(id).await?))
}

async fn record_views(state: &AppState) -> ApiResult<Vec<RecordView>> {
    let now = Utc::now().timestamp();
    let records = state.ledger.records().await?;
    Ok(records.iter().map(|r| RecordView::from_record(r, now)).collect())
}

pub async fn progress_tracker(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Json<Value>> {
    let mut records = record_views(&state).await?;
    records.sort_by_key(|r| r.timestamp);
    let trends = analytics::trends(&records);

    Ok(Json(json!({
        "totalRecords": records.len(),
        "averageESGScore": analytics::average_esg(&records),
        "progressMetrics": {
            "esgImprovement": trends.esg_improvement,
            "carbonReduction": trends.carbon_reduction,
            "sustainabilityScore": trends.sustainability_score,
        },
        "trends": trends,
        "records": records,
    })))
}

pub async fn esg_analytics(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiQuery(query): ApiQuery<AnalyticsQuery>,
) -> ApiResult<Json<Value>> {
    let filter = AnalyticsFilter::from_query(&query)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let records: Vec<RecordView> = record_views(&state)
        .await?
        .into_iter()
        .filter(|r| filter.matches(r))
        .collect();

    Ok(Json(json!({
        "totalRecords": records.len(),
        "averageESGScore": analytics::average_esg(&records),
        "averageCreditAmount": analytics::average_credit(&records),
        "sectorAnalytics": analytics::sector_analytics(&records),
        "timeSeriesData": analytics::time_series(&records),
        "records": records,
        "filters": {
            "sector": filter.sector.as_deref().unwrap_or("all"),
            "startDate": query.start_date,
            "endDate": query.end_date,
            "minScore": filter.min_score,
            "maxScore": filter.max_score,
        },
    })))
}

/// Records owned by the caller's wallet, or by the service account when
/// no wallet is linked.
pub async fn user_stats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Value>> {
    let Some(owner) = user.wallet_address.or_else(|| state.ledger.service_account()) else {
        return Ok(Json(json!({
            "totalRecords": 0,
            "totalTokens": 0,
            "redeemedAmount": 0,
            "lastRedemption": 0,
        })));
    };

    let owned: Vec<CreditRecord> = state
        .ledger
        .records()
        .await?
        .into_iter()
        .filter(|r| r.user == owner)
        .collect();
    let stats = state.ledger.user_stats(owner).await?;

    Ok(Json(json!({
        "walletAddress": owner,
        "totalRecords": owned.len(),
        "totalTokens": analytics::saturating_total(owned.iter().map(|r| r.credit_amount)),
        "redeemedAmount": stats.redeemed_amount,
        "lastRedemption": stats.last_redemption,
    })))
}
