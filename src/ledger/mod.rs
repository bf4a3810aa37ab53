//! Credit ledger: the externally deployed contract that stores credit
//! records and the token balance of each wallet.
//!
//! `CreditLedger` is the seam between request handlers and the chain.
//! `AlloyLedger` talks JSON-RPC; `MemoryLedger` keeps everything in
//! process for offline runs and tests.

pub mod contract;
pub mod memory;
pub mod rpc;

use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::Serialize;

pub use memory::MemoryLedger;
pub use rpc::AlloyLedger;

/// Concurrent `getRecord` calls when listing the whole registry.
pub const RECORD_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditRecord {
    pub id: u64,
    pub user: Address,
    pub esg_score: u64,
    pub credit_amount: u64,
    pub approved: bool,
    /// Unix seconds, as set by the contract.
    pub timestamp: i64,
    pub project_description: String,
    pub loan_amount: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStats {
    pub total_records: u64,
    pub total_tokens: u64,
    pub redeemed_amount: u64,
    pub last_redemption: u64,
}

#[derive(Debug, Clone)]
pub struct NewCredit {
    pub esg_score: u64,
    pub credit_amount: u64,
    pub project_description: String,
    pub loan_amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSubmission {
    pub tx_hash: B256,
    /// Id assigned by the contract; `None` when it could not be determined.
    pub record_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    fn contract_address(&self) -> Address;

    /// Account that signs contract writes, if any.
    fn service_account(&self) -> Option<Address>;

    async fn record_count(&self) -> Result<u64>;

    async fn record(&self, id: u64) -> Result<CreditRecord>;

    /// Every record in id order.
    async fn records(&self) -> Result<Vec<CreditRecord>> {
        let count = self.record_count().await?;
        stream::iter(0..count)
            .map(|id| self.record(id))
            .buffered(RECORD_FETCH_CONCURRENCY)
            .try_collect()
            .await
    }

    async fn balance_of(&self, owner: Address) -> Result<U256>;

    async fn user_stats(&self, user: Address) -> Result<UserStats>;

    /// `None` while the transaction is unknown or still pending.
    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptSummary>>;

    async fn block_number(&self) -> Result<u64>;

    async fn add_record(&self, credit: NewCredit) -> Result<RecordSubmission>;

    async fn approve_credit(&self, id: u64) -> Result<B256>;

    async fn mint(&self, to: Address, amount: U256) -> Result<B256>;
}

/// Lossy narrowing used for amounts rendered as JSON numbers.
pub fn to_u64(v: U256) -> u64 {
    v.saturating_to::<u64>()
}
