use alloy_primitives::Address;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{LoanRecord, NewUser, StoreError, User, UserStore, USER_EXISTS, WALLET_TAKEN};

const COLLECTION: &str = "users";
const DUPLICATE_KEY: i32 = 11000;
const NAMESPACE_NOT_FOUND: i32 = 26;
const WALLET_INDEX: &str = "address_1";

/// Document layout shared with the existing `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    username: String,
    email: String,
    /// bcrypt hash.
    password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(default)]
    esg_score: Option<f64>,
    #[serde(default)]
    credit_amount: Option<f64>,
    #[serde(default)]
    approved: bool,
    #[serde(default)]
    created_at: Option<bson::DateTime>,
    #[serde(default)]
    records: Vec<LoanRecordDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoanRecordDocument {
    project_description: String,
    loan_amount: f64,
    timestamp: i64,
}

impl From<&LoanRecord> for LoanRecordDocument {
    fn from(r: &LoanRecord) -> Self {
        Self {
            project_description: r.project_description.clone(),
            loan_amount: r.loan_amount as f64,
            timestamp: r.timestamp,
        }
    }
}

impl UserDocument {
    fn into_user(self) -> anyhow::Result<User> {
        let oid = self.id.ok_or_else(|| anyhow!("user document without _id"))?;
        let created_millis = self
            .created_at
            .map(|d| d.timestamp_millis())
            .unwrap_or_else(|| oid.timestamp().timestamp_millis());
        let created_at: DateTime<Utc> =
            DateTime::from_timestamp_millis(created_millis).unwrap_or_else(Utc::now);

        Ok(User {
            id: oid.to_hex(),
            username: self.username,
            email: self.email,
            password_hash: self.password,
            // Legacy documents carry an empty string instead of no address.
            wallet_address: self.address.as_deref().and_then(|a| a.parse::<Address>().ok()),
            esg_score: self.esg_score.map(|v| v.max(0.0) as u64),
            credit_amount: self.credit_amount.map(|v| v.max(0.0) as u64),
            approved: self.approved,
            created_at,
            records: self
                .records
                .into_iter()
                .map(|r| LoanRecord {
                    project_description: r.project_description,
                    loan_amount: r.loan_amount.max(0.0) as u64,
                    timestamp: r.timestamp,
                })
                .collect(),
        })
    }
}

pub struct MongoUserStore {
    users: Collection<UserDocument>,
}

impl MongoUserStore {
    pub async fn connect(uri: &str, database: &str) -> anyhow::Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .context("Failed to connect to MongoDB")?;
        let users = client.database(database).collection::<UserDocument>(COLLECTION);
        let store = Self { users };
        store.ensure_indexes().await?;
        info!("Connected to MongoDB database '{}'", database);
        Ok(store)
    }

    async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let existing: Vec<IndexModel> = match self.users.list_indexes().await {
            Ok(cursor) => cursor.try_collect().await.context("Failed to read users indexes")?,
            Err(e) if is_namespace_missing(&e) => Vec::new(),
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to list users indexes")),
        };
        if let Some(name) = stale_wallet_index(&existing) {
            warn!("Replacing users index '{}' so accounts without a wallet do not collide", name);
            self.users
                .drop_index(name.as_str())
                .await
                .with_context(|| format!("Failed to drop users index '{name}'"))?;
        }

        let unique = |field: &str| {
            IndexModel::builder()
                .keys(doc! { field: 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        for model in [unique("username"), unique("email"), wallet_index()] {
            self.users
                .create_index(model)
                .await
                .context("Failed to create users index")?;
        }
        Ok(())
    }

    async fn find_one(&self, filter: Document) -> anyhow::Result<Option<User>> {
        self.users
            .find_one(filter)
            .await
            .context("MongoDB find_one failed")?
            .map(UserDocument::into_user)
            .transpose()
    }
}

fn parse_oid(id: &str) -> Result<ObjectId, StoreError> {
    ObjectId::parse_str(id).map_err(|_| StoreError::NotFound(id.to_string()))
}

/// Unique wallet addresses. Accounts without a wallet (field missing, or
/// the empty string older documents carry) are outside the index.
fn wallet_index() -> IndexModel {
    let options = IndexOptions::builder()
        .name(WALLET_INDEX.to_string())
        .unique(true)
        .partial_filter_expression(wallet_filter())
        .build();
    IndexModel::builder()
        .keys(doc! { "address": 1 })
        .options(options)
        .build()
}

fn wallet_filter() -> Document {
    doc! { "address": { "$type": "string", "$gt": "" } }
}

/// Name of an existing `address` index that differs from [`wallet_index`],
/// e.g. a plain unique index that treats every empty address as equal.
fn stale_wallet_index(existing: &[IndexModel]) -> Option<String> {
    let wanted = wallet_filter();
    existing
        .iter()
        .filter(|m| m.keys.len() == 1 && m.keys.contains_key("address"))
        .filter_map(|m| m.options.as_ref())
        .find(|o| o.unique != Some(true) || o.partial_filter_expression.as_ref() != Some(&wanted))
        .and_then(|o| o.name.clone())
}

/// Server message of a duplicate-key failure.
fn duplicate_key_message(e: &mongodb::error::Error) -> Option<&str> {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY => {
            Some(we.message.as_str())
        }
        ErrorKind::Command(ce) if ce.code == DUPLICATE_KEY => Some(ce.message.as_str()),
        _ => None,
    }
}

fn is_namespace_missing(e: &mongodb::error::Error) -> bool {
    matches!(e.kind.as_ref(), ErrorKind::Command(ce) if ce.code == NAMESPACE_NOT_FOUND)
}

/// Duplicate-key messages name the violated index, e.g.
/// `E11000 duplicate key error collection: db.users index: address_1 dup key: ...`.
fn duplicate_conflict(message: &str) -> StoreError {
    if message.contains("address") {
        StoreError::Duplicate(WALLET_TAKEN.into())
    } else {
        StoreError::Duplicate(USER_EXISTS.into())
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<User>> {
        match ObjectId::parse_str(id) {
            Ok(oid) => self.find_one(doc! { "_id": oid }).await,
            Err(_) => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.find_one(doc! { "email": email }).await
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        self.find_one(doc! { "username": username }).await
    }

    async fn exists(&self, email: &str, username: &str) -> anyhow::Result<bool> {
        let found = self
            .users
            .find_one(doc! { "$or": [ { "email": email }, { "username": username } ] })
            .await
            .context("MongoDB find_one failed")?;
        Ok(found.is_some())
    }

    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let mut document = UserDocument {
            id: None,
            username: new.username,
            email: new.email,
            password: new.password_hash,
            address: new.wallet_address.map(|a| a.to_checksum(None)),
            esg_score: Some(0.0),
            credit_amount: Some(0.0),
            approved: false,
            created_at: Some(bson::DateTime::now()),
            records: Vec::new(),
        };

        let result = match self.users.insert_one(&document).await {
            Ok(r) => r,
            Err(e) => match duplicate_key_message(&e) {
                Some(message) => return Err(duplicate_conflict(message)),
                None => return Err(anyhow::Error::new(e).context("MongoDB insert failed").into()),
            },
        };
        document.id = result.inserted_id.as_object_id();
        Ok(document.into_user()?)
    }

    async fn set_wallet(&self, id: &str, wallet: Address) -> Result<User, StoreError> {
        let oid = parse_oid(id)?;
        let update = doc! { "$set": { "address": wallet.to_checksum(None) } };
        let result = match self.users.update_one(doc! { "_id": oid }, update).await {
            Ok(r) => r,
            Err(e) if duplicate_key_message(&e).is_some() => {
                return Err(StoreError::Duplicate(WALLET_TAKEN.into()));
            }
            Err(e) => return Err(anyhow::Error::new(e).context("MongoDB update failed").into()),
        };
        if result.matched_count == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn record_loan(
        &self,
        id: &str,
        esg_score: u64,
        credit_amount: u64,
        record: LoanRecord,
    ) -> Result<(), StoreError> {
        let oid = parse_oid(id)?;
        let record = bson::to_bson(&LoanRecordDocument::from(&record))
            .context("Failed to encode loan record")?;
        let update = doc! {
            "$set": { "esgScore": esg_score as f64, "creditAmount": credit_amount as f64 },
            "$push": { "records": record },
        };
        let result = self
            .users
            .update_one(doc! { "_id": oid }, update)
            .await
            .context("MongoDB update failed")?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_index(options: IndexOptions) -> IndexModel {
        IndexModel::builder()
            .keys(doc! { "address": 1 })
            .options(options)
            .build()
    }

    #[test]
    fn test_plain_unique_wallet_index_is_replaced() {
        let legacy = address_index(
            IndexOptions::builder()
                .name("address_1".to_string())
                .unique(true)
                .build(),
        );
        let id = IndexModel::builder()
            .keys(doc! { "_id": 1 })
            .options(IndexOptions::builder().name("_id_".to_string()).build())
            .build();
        assert_eq!(stale_wallet_index(&[id, legacy]), Some("address_1".to_string()));

        let sparse = address_index(
            IndexOptions::builder().name("address_1".to_string()).unique(true).sparse(true).build(),
        );
        assert_eq!(stale_wallet_index(&[sparse]), Some("address_1".to_string()));
    }

    #[test]
    fn test_current_wallet_index_is_kept() {
        assert_eq!(stale_wallet_index(&[wallet_index()]), None);
        assert_eq!(stale_wallet_index(&[]), None);
    }

    #[test]
    fn test_duplicate_conflict_names_the_field() {
        let wallet = duplicate_conflict(
            "E11000 duplicate key error collection: greencredit.users \
             index: address_1 dup key: { address: \"0xabc\" }",
        );
        assert_eq!(wallet.to_string(), WALLET_TAKEN);
        let email = duplicate_conflict(
            "E11000 duplicate key error collection: greencredit.users \
             index: email_1 dup key: { email: \"a@b.co\" }",
        );
        assert_eq!(email.to_string(), USER_EXISTS);
    }
}
