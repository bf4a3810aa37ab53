use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use alloy_primitives::{keccak256, Address, B256, U256};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    to_u64, CreditLedger, CreditRecord, NewCredit, ReceiptSummary, RecordSubmission, UserStats,
};

const GAS_PER_WRITE: u64 = 21_000;

#[derive(Debug, Default)]
struct Chain {
    records: Vec<CreditRecord>,
    balances: HashMap<Address, U256>,
    stats: HashMap<Address, UserStats>,
    receipts: HashMap<B256, ReceiptSummary>,
    head: u64,
    nonce: u64,
}

impl Chain {
    /// Seal a transaction in its own block; the head moves past it so it
    /// has one confirmation straight away.
    fn mine(&mut self, success: bool) -> B256 {
        self.nonce += 1;
        let tx_hash = keccak256(self.nonce.to_be_bytes());
        self.head += 1;
        self.receipts.insert(
            tx_hash,
            ReceiptSummary {
                tx_hash,
                success,
                block_number: self.head,
                gas_used: GAS_PER_WRITE,
            },
        );
        self.head += 1;
        tx_hash
    }
}

/// Process-local ledger, used when no contract is configured and in tests.
#[derive(Debug)]
pub struct MemoryLedger {
    contract: Address,
    account: Address,
    chain: RwLock<Chain>,
    offline: AtomicBool,
}

impl MemoryLedger {
    pub fn new(account: Address) -> Self {
        Self {
            contract: Address::ZERO,
            account,
            chain: RwLock::new(Chain::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every call fail, as an unreachable RPC endpoint would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("ledger offline");
        }
        Ok(())
    }

    pub async fn set_balance(&self, owner: Address, amount: U256) {
        self.chain.write().await.balances.insert(owner, amount);
    }

    /// Register an externally submitted transaction, e.g. a wallet-side
    /// redemption, so it can be verified by hash.
    pub async fn external_transaction(&self, success: bool) -> B256 {
        self.chain.write().await.mine(success)
    }
}

#[async_trait]
impl CreditLedger for MemoryLedger {
    fn contract_address(&self) -> Address {
        self.contract
    }

    fn service_account(&self) -> Option<Address> {
        Some(self.account)
    }

    async fn record_count(&self) -> Result<u64> {
        self.check_online()?;
        Ok(self.chain.read().await.records.len() as u64)
    }

    async fn record(&self, id: u64) -> Result<CreditRecord> {
        self.check_online()?;
        let chain = self.chain.read().await;
        usize::try_from(id)
            .ok()
            .and_then(|i| chain.records.get(i))
            .cloned()
            .ok_or_else(|| anyhow!("getRecord({id}): record does not exist"))
    }

    async fn balance_of(&self, owner: Address) -> Result<U256> {
        self.check_online()?;
        Ok(self.chain.read().await.balances.get(&owner).copied().unwrap_or_default())
    }

    async fn user_stats(&self, user: Address) -> Result<UserStats> {
        self.check_online()?;
        Ok(self.chain.read().await.stats.get(&user).copied().unwrap_or_default())
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptSummary>> {
        self.check_online()?;
        Ok(self.chain.read().await.receipts.get(&tx_hash).copied())
    }

    async fn block_number(&self) -> Result<u64> {
        self.check_online()?;
        Ok(self.chain.read().await.head)
    }

    async fn add_record(&self, credit: NewCredit) -> Result<RecordSubmission> {
        self.check_online()?;
        let mut chain = self.chain.write().await;
        let id = chain.records.len() as u64;
        chain.records.push(CreditRecord {
            id,
            user: self.account,
            esg_score: credit.esg_score,
            credit_amount: credit.credit_amount,
            approved: false,
            timestamp: Utc::now().timestamp(),
            project_description: credit.project_description,
            loan_amount: credit.loan_amount,
        });
        chain.stats.entry(self.account).or_default().total_records += 1;
        let tx_hash = chain.mine(true);
        Ok(RecordSubmission { tx_hash, record_id: Some(id) })
    }

    async fn approve_credit(&self, id: u64) -> Result<B256> {
        self.check_online()?;
        let mut chain = self.chain.write().await;
        let record = usize::try_from(id)
            .ok()
            .and_then(|i| chain.records.get_mut(i))
            .ok_or_else(|| anyhow!("approveCredit({id}): record does not exist"))?;
        if record.approved {
            bail!("approveCredit({id}): already approved");
        }
        record.approved = true;
        Ok(chain.mine(true))
    }

    async fn mint(&self, to: Address, amount: U256) -> Result<B256> {
        self.check_online()?;
        let mut chain = self.chain.write().await;
        let balance = chain.balances.entry(to).or_default();
        *balance = balance.saturating_add(amount);
        let stats = chain.stats.entry(to).or_default();
        stats.total_tokens = stats.total_tokens.saturating_add(to_u64(amount));
        Ok(chain.mine(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(esg: u64) -> NewCredit {
        NewCredit {
            esg_score: esg,
            credit_amount: 1_000,
            project_description: "Solar farm".into(),
            loan_amount: 500,
        }
    }

    #[tokio::test]
    async fn test_records_are_sequential() {
        let ledger = MemoryLedger::new(Address::repeat_byte(0x0A));
        let a = ledger.add_record(credit(70)).await.unwrap();
        let b = ledger.add_record(credit(80)).await.unwrap();
        assert_eq!(a.record_id, Some(0));
        assert_eq!(b.record_id, Some(1));
        assert_ne!(a.tx_hash, b.tx_hash);

        let all = ledger.records().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].esg_score, 80);
        assert_eq!(all[0].user, Address::repeat_byte(0x0A));
        assert!(ledger.record(2).await.is_err());
    }

    #[tokio::test]
    async fn test_write_has_one_confirmation() {
        let ledger = MemoryLedger::new(Address::ZERO);
        let sub = ledger.add_record(credit(70)).await.unwrap();
        let receipt = ledger.receipt(sub.tx_hash).await.unwrap().unwrap();
        assert!(receipt.success);
        let head = ledger.block_number().await.unwrap();
        assert_eq!(head - receipt.block_number, 1);
    }

    #[tokio::test]
    async fn test_approve_twice_fails() {
        let ledger = MemoryLedger::new(Address::ZERO);
        ledger.add_record(credit(70)).await.unwrap();
        ledger.approve_credit(0).await.unwrap();
        assert!(ledger.record(0).await.unwrap().approved);
        assert!(ledger.approve_credit(0).await.is_err());
        assert!(ledger.approve_credit(9).await.is_err());
    }

    #[tokio::test]
    async fn test_mint_updates_balance_and_stats() {
        let ledger = MemoryLedger::new(Address::ZERO);
        let to = Address::repeat_byte(0x33);
        ledger.mint(to, U256::from(250u64)).await.unwrap();
        ledger.mint(to, U256::from(50u64)).await.unwrap();
        assert_eq!(ledger.balance_of(to).await.unwrap(), U256::from(300u64));
        assert_eq!(ledger.user_stats(to).await.unwrap().total_tokens, 300);
    }

    #[tokio::test]
    async fn test_offline_fails_reads() {
        let ledger = MemoryLedger::new(Address::ZERO);
        ledger.set_offline(true);
        assert!(ledger.record_count().await.is_err());
        ledger.set_offline(false);
        assert_eq!(ledger.record_count().await.unwrap(), 0);
    }
}
