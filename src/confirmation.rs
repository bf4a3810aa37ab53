//! Transaction confirmation tracking.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use anyhow::Result;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{Event, EventHub, TransactionUpdate, TxStatus};
use crate::ledger::CreditLedger;

pub const MIN_CONFIRMATIONS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: TxStatus,
    pub confirmations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    pub message: &'static str,
}

/// Single-shot status: no receipt is pending; a reverted receipt is
/// failed once it has a confirmation.
pub async fn transaction_status(ledger: &dyn CreditLedger, tx_hash: B256) -> Result<StatusReport> {
    let Some(receipt) = ledger.receipt(tx_hash).await? else {
        return Ok(StatusReport {
            status: TxStatus::Pending,
            confirmations: 0,
            block_number: None,
            gas_used: None,
            message: "Transaction not found or still pending",
        });
    };
    let head = ledger.block_number().await?;
    let confirmations = head.saturating_sub(receipt.block_number);

    let (status, message) = match (confirmations >= MIN_CONFIRMATIONS, receipt.success) {
        (false, _) => (TxStatus::Pending, "Transaction pending confirmation"),
        (true, true) => (TxStatus::Confirmed, "Transaction confirmed"),
        (true, false) => (TxStatus::Failed, "Transaction failed on-chain"),
    };
    Ok(StatusReport {
        status,
        confirmations,
        block_number: Some(receipt.block_number),
        gas_used: Some(receipt.gas_used),
        message,
    })
}

/// Polls submitted transactions in the background and publishes a
/// `transactionUpdate` once each one settles or the attempts run out.
#[derive(Clone)]
pub struct ConfirmationWatcher {
    ledger: Arc<dyn CreditLedger>,
    events: EventHub,
    poll: Duration,
    max_attempts: u32,
}

impl ConfirmationWatcher {
    pub fn new(
        ledger: Arc<dyn CreditLedger>,
        events: EventHub,
        poll: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            ledger,
            events,
            poll,
            max_attempts,
        }
    }

    pub fn watch(&self, tx_hash: B256, esg_score: Option<u64>) -> JoinHandle<TxStatus> {
        let this = self.clone();
        tokio::spawn(async move {
            let (status, block_number) = this.poll_until_settled(tx_hash).await;
            this.events.publish(Event::TransactionUpdate(TransactionUpdate {
                tx_hash,
                status,
                esg_score,
                block_number,
            }));
            status
        })
    }

    async fn poll_until_settled(&self, tx_hash: B256) -> (TxStatus, Option<u64>) {
        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.poll).await;
            match transaction_status(self.ledger.as_ref(), tx_hash).await {
                Ok(report) if report.status != TxStatus::Pending => {
                    info!(
                        "tx {} {:?} after {} poll(s), block {:?}",
                        tx_hash, report.status, attempt, report.block_number
                    );
                    return (report.status, report.block_number);
                }
                Ok(_) => {
                    debug!("tx {} pending (attempt {}/{})", tx_hash, attempt, self.max_attempts)
                }
                Err(e) => warn!("tx {} status check failed: {:#}", tx_hash, e),
            }
        }
        warn!("tx {} not confirmed after {} attempts", tx_hash, self.max_attempts);
        (TxStatus::Timeout, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryLedger, NewCredit};
    use alloy_primitives::Address;

    fn credit() -> NewCredit {
        NewCredit {
            esg_score: 75,
            credit_amount: 10,
            project_description: "Wind".into(),
            loan_amount: 10,
        }
    }

    #[tokio::test]
    async fn test_unknown_tx_is_pending() {
        let ledger = MemoryLedger::new(Address::ZERO);
        let r = transaction_status(&ledger, B256::repeat_byte(9)).await.unwrap();
        assert_eq!(r.status, TxStatus::Pending);
        assert_eq!(r.confirmations, 0);
        assert!(r.block_number.is_none());
    }

    #[tokio::test]
    async fn test_status_confirmed_and_failed() {
        let ledger = MemoryLedger::new(Address::ZERO);
        let ok = ledger.add_record(credit()).await.unwrap().tx_hash;
        let bad = ledger.external_transaction(false).await;

        let r = transaction_status(&ledger, ok).await.unwrap();
        assert_eq!(r.status, TxStatus::Confirmed);
        assert!(r.confirmations >= 1);

        let r = transaction_status(&ledger, bad).await.unwrap();
        assert_eq!(r.status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn test_watcher_publishes_confirmation() {
        let ledger: Arc<MemoryLedger> = Arc::new(MemoryLedger::new(Address::ZERO));
        let hub = EventHub::default();
        let mut rx = hub.subscribe();
        let watcher = ConfirmationWatcher::new(ledger.clone(), hub, Duration::from_millis(1), 5);

        let tx = ledger.add_record(credit()).await.unwrap().tx_hash;
        let status = watcher.watch(tx, Some(75)).await.unwrap();
        assert_eq!(status, TxStatus::Confirmed);

        match rx.recv().await.unwrap() {
            Event::TransactionUpdate(u) => {
                assert_eq!(u.tx_hash, tx);
                assert_eq!(u.status, TxStatus::Confirmed);
                assert_eq!(u.esg_score, Some(75));
                assert!(u.block_number.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watcher_times_out() {
        let ledger = Arc::new(MemoryLedger::new(Address::ZERO));
        let hub = EventHub::default();
        let mut rx = hub.subscribe();
        let watcher = ConfirmationWatcher::new(ledger, hub, Duration::from_millis(1), 3);

        let status = watcher.watch(B256::repeat_byte(7), None).await.unwrap();
        assert_eq!(status, TxStatus::Timeout);
        let Event::TransactionUpdate(u) = rx.recv().await.unwrap() else {
            panic!("expected transactionUpdate");
        };
        assert_eq!(u.status, TxStatus::Timeout);
    }
}
