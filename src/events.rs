//! Real-time notifications pushed to connected WebSocket clients.

use alloy_primitives::{Address, B256};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCreated {
    pub record_id: Option<u64>,
    pub user: String,
    pub esg_score: u64,
    pub credit_amount: u64,
    pub project_description: String,
    pub loan_amount: u64,
    pub tx_hash: B256,
    pub status: TxStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub tx_hash: B256,
    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub esg_score: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditApproved {
    pub record_id: u64,
    pub final_loan_amount: u64,
    pub admin_notes: String,
    pub tx_hash: B256,
    pub approved_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensMinted {
    pub recipient: Address,
    pub amount: String,
    pub tx_hash: B256,
    pub minted_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensTransferred {
    pub from: String,
    pub recipient: Address,
    pub amount: String,
    pub tx_hash: B256,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRedeemed {
    pub user: String,
    pub amount: u64,
    pub discount: String,
    pub loan_amount: String,
    pub tx_hash: B256,
}

/// Wire form: `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Event {
    RecordCreated(RecordCreated),
    TransactionUpdate(TransactionUpdate),
    CreditApproved(CreditApproved),
    TokensMinted(TokensMinted),
    TokensTransferred(TokensTransferred),
    TokenRedeemed(TokenRedeemed),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::RecordCreated(_) => "recordCreated",
            Event::TransactionUpdate(_) => "transactionUpdate",
            Event::CreditApproved(_) => "creditApproved",
            Event::TokensMinted(_) => "tokensMinted",
            Event::TokensTransferred(_) => "tokensTransferred",
            Event::TokenRedeemed(_) => "tokenRedeemed",
        }
    }
}

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Event>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget; returns how many subscribers received the event.
    pub fn publish(&self, event: Event) -> usize {
        let name = event.name();
        let delivered = self.tx.send(event).unwrap_or(0);
        debug!("event {} delivered to {} subscriber(s)", name, delivered);
        delivered
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(status: TxStatus) -> Event {
        Event::TransactionUpdate(TransactionUpdate {
            tx_hash: B256::repeat_byte(0x11),
            status,
            esg_score: Some(80),
            block_number: None,
        })
    }

    #[test]
    fn test_wire_shape() {
        let v = serde_json::to_value(update(TxStatus::Confirmed)).unwrap();
        assert_eq!(v["event"], "transactionUpdate");
        assert_eq!(v["data"]["status"], "confirmed");
        assert_eq!(v["data"]["esgScore"], 80);
        assert!(v["data"].get("blockNumber").is_none());
        assert!(v["data"]["txHash"].as_str().unwrap().starts_with("0x1111"));
    }

    #[test]
    fn test_event_names_match_tags() {
        let e = Event::TokenRedeemed(TokenRedeemed {
            user: "alice".into(),
            amount: 100,
            discount: "8% interest reduction".into(),
            loan_amount: "315,000,000 VND".into(),
            tx_hash: B256::ZERO,
        });
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["event"], e.name());
        assert_eq!(update(TxStatus::Timeout).name(), "transactionUpdate");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = EventHub::default();
        assert_eq!(hub.publish(update(TxStatus::Pending)), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let hub = EventHub::new(8);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(update(TxStatus::Pending));
        hub.publish(update(TxStatus::Confirmed));

        assert_eq!(a.recv().await.unwrap(), update(TxStatus::Pending));
        assert_eq!(a.recv().await.unwrap(), update(TxStatus::Confirmed));
        assert_eq!(b.recv().await.unwrap(), update(TxStatus::Pending));
    }
}
