use std::collections::HashMap;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{LoanRecord, NewUser, StoreError, User, UserStore, USER_EXISTS, WALLET_TAKEN};

/// Process-local store, used when no MongoDB URI is configured.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn exists(&self, email: &str, username: &str) -> anyhow::Result<bool> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .any(|u| u.email == email || u.username == username))
    }

    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        // Checked under the write lock so concurrent registrations cannot both win.
        if users
            .values()
            .any(|u| u.email == new.email || u.username == new.username)
        {
            return Err(StoreError::Duplicate(USER_EXISTS.into()));
        }
        if let Some(wallet) = new.wallet_address {
            if users.values().any(|u| u.wallet_address == Some(wallet)) {
                return Err(StoreError::Duplicate(WALLET_TAKEN.into()));
            }
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            wallet_address: new.wallet_address,
            esg_score: Some(0),
            credit_amount: Some(0),
            approved: false,
            created_at: Utc::now(),
            records: Vec::new(),
        };
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn set_wallet(&self, id: &str, wallet: Address) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.id != id && u.wallet_address == Some(wallet))
        {
            return Err(StoreError::Duplicate(WALLET_TAKEN.into()));
        }
        let user = users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        user.wallet_address = Some(wallet);
        Ok(user.clone())
    }

    async fn record_loan(
        &self,
        id: &str,
        esg_score: u64,
        credit_amount: u64,
        record: LoanRecord,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        user.esg_score = Some(esg_score);
        user.credit_amount = Some(credit_amount);
        user.records.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            username: name.into(),
            email: email.into(),
            password_hash: "hash".into(),
            wallet_address: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = MemoryUserStore::new();
        let user = store.insert(new_user("alice", "alice@example.com")).await.unwrap();

        assert_eq!(store.find_by_id(&user.id).await.unwrap().unwrap().username, "alice");
        assert!(store.find_by_email("alice@example.com").await.unwrap().is_some());
        assert!(store.find_by_username("alice").await.unwrap().is_some());
        assert!(store.exists("other@example.com", "alice").await.unwrap());
        assert!(!store.exists("other@example.com", "bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_email_or_username_rejected() {
        let store = MemoryUserStore::new();
        store.insert(new_user("alice", "alice@example.com")).await.unwrap();

        let dup_email = store.insert(new_user("bob", "alice@example.com")).await;
        assert!(matches!(dup_email, Err(StoreError::Duplicate(_))));
        let dup_name = store.insert(new_user("alice", "bob@example.com")).await;
        assert!(matches!(dup_name, Err(StoreError::Duplicate(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_wallet_is_unique_across_users() {
        let store = MemoryUserStore::new();
        let a = store.insert(new_user("alice", "alice@example.com")).await.unwrap();
        let b = store.insert(new_user("bob", "bob@example.com")).await.unwrap();
        let wallet = Address::repeat_byte(0x11);

        store.set_wallet(&a.id, wallet).await.unwrap();
        // Re-linking the same wallet to the same user is fine.
        store.set_wallet(&a.id, wallet).await.unwrap();
        let taken = store.set_wallet(&b.id, wallet).await;
        assert!(matches!(taken, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_record_loan_appends() {
        let store = MemoryUserStore::new();
        let u = store.insert(new_user("alice", "alice@example.com")).await.unwrap();
        let rec = LoanRecord {
            project_description: "Solar farm".into(),
            loan_amount: 500,
            timestamp: 1_700_000_000,
        };
        store.record_loan(&u.id, 85, 1000, rec.clone()).await.unwrap();

        let u = store.find_by_id(&u.id).await.unwrap().unwrap();
        assert_eq!(u.esg_score, Some(85));
        assert_eq!(u.credit_amount, Some(1000));
        assert_eq!(u.records, vec![rec]);

        let missing = store.record_loan("nope", 1, 1, u.records[0].clone()).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }
}
