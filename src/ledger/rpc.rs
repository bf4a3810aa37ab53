//! JSON-RPC implementation of [`CreditLedger`] on top of alloy.

use std::str::FromStr;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::rpc::types::{Log, TransactionReceipt, TransactionRequest};
use alloy::signers::Signer;
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::contract::GreenCredit;
use super::{
    to_u64, CreditLedger, CreditRecord, NewCredit, ReceiptSummary, RecordSubmission, UserStats,
};
use crate::config::ChainSettings;

/// Token metadata, used by diagnostics.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub owner: Address,
    pub total_supply: U256,
}

pub struct AlloyLedger {
    provider: DynProvider,
    contract: GreenCredit::GreenCreditInstance<DynProvider>,
    address: Address,
    /// Address of the local signer; `None` means read-only.
    signer: Option<Address>,
    chain_id: u64,
    gas_price_multiplier: f64,
    /// Held across estimate → nonce → send so writes never share a nonce.
    write_lock: Mutex<()>,
}

impl AlloyLedger {
    pub fn connect(chain: &ChainSettings) -> Result<Self> {
        let address = chain
            .contract_address
            .ok_or_else(|| anyhow!("CONTRACT_ADDRESS is not set"))?;

        let signer = chain
            .private_key
            .as_ref()
            .map(|pk| {
                PrivateKeySigner::from_str(pk.expose_secret().trim())
                    .map(|s| s.with_chain_id(Some(chain.chain_id)))
                    .context("Invalid PRIVATE_KEY")
            })
            .transpose()?;
        let signer_address = signer.as_ref().map(|s| s.address());

        if let (Some(configured), Some(derived)) = (chain.account, signer_address) {
            if configured != derived {
                warn!(
                    "ACCOUNT {} does not match PRIVATE_KEY address {}; using the key's address",
                    configured, derived
                );
            }
        }

        let provider = match signer {
            Some(s) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(s))
                .connect_http(chain.rpc_url.clone())
                .erased(),
            None => {
                warn!("No PRIVATE_KEY configured; contract writes are disabled");
                ProviderBuilder::new().connect_http(chain.rpc_url.clone()).erased()
            }
        };
        let contract = GreenCredit::new(address, provider.clone());

        info!(
            "Ledger ready: contract={} rpc={} signer={:?}",
            address, chain.rpc_url, signer_address
        );

        Ok(Self {
            provider,
            contract,
            address,
            signer: signer_address,
            chain_id: chain.chain_id,
            gas_price_multiplier: chain.gas_price_multiplier,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn token_info(&self) -> Result<TokenInfo> {
        Ok(TokenInfo {
            name: self.contract.name().call().await.context("name()")?,
            symbol: self.contract.symbol().call().await.context("symbol()")?,
            decimals: self.contract.decimals().call().await.context("decimals()")?,
            owner: self.contract.owner().call().await.context("owner()")?,
            total_supply: self.contract.totalSupply().call().await.context("totalSupply()")?,
        })
    }

    /// estimate gas → gas price × multiplier → pending nonce → sign + send → receipt.
    async fn submit(&self, label: &str, tx: TransactionRequest) -> Result<TransactionReceipt> {
        let from = self
            .signer
            .ok_or_else(|| {
                anyhow!("{label}: no PRIVATE_KEY configured, cannot sign transactions")
            })?;

        let _guard = self.write_lock.lock().await;
        let tx = tx.with_from(from);

        let gas = self
            .provider
            .estimate_gas(tx.clone())
            .await
            .with_context(|| format!("{label}: estimate gas"))?;
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .with_context(|| format!("{label}: fetch gas price"))?;
        let gas_price = bump_gas_price(gas_price, self.gas_price_multiplier);
        let nonce = self
            .provider
            .get_transaction_count(from)
            .pending()
            .await
            .with_context(|| format!("{label}: fetch pending nonce"))?;

        let tx = tx
            .with_gas_limit(gas)
            .with_gas_price(gas_price)
            .with_nonce(nonce)
            .with_chain_id(self.chain_id);

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .with_context(|| format!("{label}: send transaction"))?;
        let tx_hash = *pending.tx_hash();
        info!("{} sent: tx={} nonce={} gas={} gas_price={}", label, tx_hash, nonce, gas, gas_price);

        let receipt = pending
            .get_receipt()
            .await
            .with_context(|| format!("{label}: await receipt for {tx_hash}"))?;
        if !receipt.status() {
            bail!("{label}: transaction {tx_hash} reverted");
        }
        info!("{} mined: tx={} block={:?}", label, tx_hash, receipt.block_number);
        Ok(receipt)
    }
}

pub fn bump_gas_price(gas_price: u128, multiplier: f64) -> u128 {
    (gas_price as f64 * multiplier).floor() as u128
}

/// Id carried by the contract's `RecordAdded` log, if the receipt has one.
pub fn record_id_from_logs(logs: &[Log], contract: Address) -> Option<u64> {
    logs.iter()
        .filter(|log| log.inner.address == contract)
        .find_map(|log| log.log_decode::<GreenCredit::RecordAdded>().ok())
        .map(|decoded| to_u64(decoded.inner.data.id))
}

impl From<(u64, GreenCredit::CreditRecord)> for CreditRecord {
    fn from((id, r): (u64, GreenCredit::CreditRecord)) -> Self {
        Self {
            id,
            user: r.user,
            esg_score: to_u64(r.esgScore),
            credit_amount: to_u64(r.creditAmount),
            approved: r.approved,
            timestamp: to_u64(r.timestamp) as i64,
            project_description: r.projectDescription,
            loan_amount: to_u64(r.loanAmount),
        }
    }
}

#[async_trait]
impl CreditLedger for AlloyLedger {
    fn contract_address(&self) -> Address {
        self.address
    }

    fn service_account(&self) -> Option<Address> {
        self.signer
    }

    async fn record_count(&self) -> Result<u64> {
        let count = self.contract.recordCount().call().await.context("recordCount()")?;
        Ok(to_u64(count))
    }

    async fn record(&self, id: u64) -> Result<CreditRecord> {
        let raw = self
            .contract
            .getRecord(U256::from(id))
            .call()
            .await
            .with_context(|| format!("getRecord({id})"))?;
        Ok(CreditRecord::from((id, raw)))
    }

    async fn balance_of(&self, owner: Address) -> Result<U256> {
        self.contract
            .balanceOf(owner)
            .call()
            .await
            .with_context(|| format!("balanceOf({owner})"))
    }

    async fn user_stats(&self, user: Address) -> Result<UserStats> {
        let s = self
            .contract
            .getUserStats(user)
            .call()
            .await
            .with_context(|| format!("getUserStats({user})"))?;
        Ok(UserStats {
            total_records: to_u64(s.totalRecords),
            total_tokens: to_u64(s.totalTokens),
            redeemed_amount: to_u64(s.redeemedAmount),
            last_redemption: to_u64(s.lastRedemption),
        })
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptSummary>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .with_context(|| format!("eth_getTransactionReceipt({tx_hash})"))?;
        Ok(receipt.and_then(|r| {
            // A receipt without a block is still pending.
            r.block_number.map(|block_number| ReceiptSummary {
                tx_hash: r.transaction_hash,
                success: r.status(),
                block_number,
                gas_used: r.gas_used,
            })
        }))
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider.get_block_number().await.context("eth_blockNumber")
    }

    async fn add_record(&self, credit: NewCredit) -> Result<RecordSubmission> {
        let tx = self
            .contract
            .addRecord(
                U256::from(credit.esg_score),
                U256::from(credit.credit_amount),
                credit.project_description,
                U256::from(credit.loan_amount),
            )
            .into_transaction_request();
        let receipt = self.submit("addRecord", tx).await?;

        let record_id = match record_id_from_logs(receipt.inner.logs(), self.address) {
            Some(id) => Some(id),
            None => {
                warn!(
                    "RecordAdded event not found in {}, using recordCount",
                    receipt.transaction_hash
                );
                match self.record_count().await {
                    Ok(count) => count.checked_sub(1),
                    Err(e) => {
                        warn!("Could not read recordCount: {:#}", e);
                        None
                    }
                }
            }
        };

        Ok(RecordSubmission {
            tx_hash: receipt.transaction_hash,
            record_id,
        })
    }

    async fn approve_credit(&self, id: u64) -> Result<B256> {
        let tx = self.contract.approveCredit(U256::from(id)).into_transaction_request();
        let receipt = self.submit("approveCredit", tx).await?;
        Ok(receipt.transaction_hash)
    }

    async fn mint(&self, to: Address, amount: U256) -> Result<B256> {
        let tx = self.contract.mint(to, amount).into_transaction_request();
        let receipt = self.submit("mint", tx).await?;
        Ok(receipt.transaction_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_sol_types::SolEvent;

    fn record_added_log(emitter: Address, id: u64) -> Log {
        let event = GreenCredit::RecordAdded {
            id: U256::from(id),
            user: Address::repeat_byte(0xAA),
            esgScore: U256::from(85u64),
            creditAmount: U256::from(1_000u64),
        };
        Log {
            inner: alloy_primitives::Log {
                address: emitter,
                data: event.encode_log_data(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_bump_gas_price() {
        assert_eq!(bump_gas_price(1_000_000_000, 1.2), 1_200_000_000);
        assert_eq!(bump_gas_price(10, 1.0), 10);
        assert_eq!(bump_gas_price(0, 1.2), 0);
    }

    #[test]
    fn test_record_id_from_logs() {
        let contract = Address::repeat_byte(0x01);
        let logs = vec![record_added_log(contract, 7)];
        assert_eq!(record_id_from_logs(&logs, contract), Some(7));
    }

    #[test]
    fn test_record_id_ignores_foreign_emitter() {
        let contract = Address::repeat_byte(0x01);
        let logs = vec![record_added_log(Address::repeat_byte(0x02), 7)];
        assert_eq!(record_id_from_logs(&logs, contract), None);
        assert_eq!(record_id_from_logs(&[], contract), None);
    }

    #[test]
    fn test_onchain_record_conversion() {
        let raw = GreenCredit::CreditRecord {
            user: Address::repeat_byte(0x05),
            esgScore: U256::from(92u64),
            creditAmount: U256::from(2_000_000_000u64),
            approved: true,
            timestamp: U256::from(1_700_000_000u64),
            projectDescription: "Wind Power Installation".into(),
            loanAmount: U256::from(1_000_000_000u64),
        };
        let rec = CreditRecord::from((3, raw));
        assert_eq!(rec.id, 3);
        assert_eq!(rec.esg_score, 92);
        assert_eq!(rec.timestamp, 1_700_000_000);
        assert_eq!(rec.loan_amount, 1_000_000_000);
        assert!(rec.approved);
    }

    #[test]
    fn test_connect_requires_contract_address() {
        let chain = ChainSettings::default();
        assert!(AlloyLedger::connect(&chain).is_err());
    }
}
