//! User accounts: model, field validation and the storage seam.

pub mod memory;
pub mod mongo;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::error::ApiError;

pub use memory::MemoryUserStore;
pub use mongo::MongoUserStore;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 30;
pub const PASSWORD_MIN: usize = 6;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub wallet_address: Option<Address>,
    pub esg_score: Option<u64>,
    pub credit_amount: Option<u64>,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub records: Vec<LoanRecord>,
}

/// Loan evaluation kept on the account alongside the on-chain record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRecord {
    pub project_description: String,
    pub loan_amount: u64,
    /// Unix seconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub wallet_address: Option<Address>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Duplicate(String),

    #[error("user {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(msg) => ApiError::Conflict(msg),
            StoreError::NotFound(msg) => ApiError::NotFound(format!("user {msg} not found")),
            StoreError::Backend(e) => ApiError::Internal(e),
        }
    }
}

pub const USER_EXISTS: &str = "User already exists";
pub const WALLET_TAKEN: &str = "Wallet address already linked to another account";

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;

    /// True when either the email or the username is already taken.
    async fn exists(&self, email: &str, username: &str) -> anyhow::Result<bool>;

    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    async fn set_wallet(&self, id: &str, wallet: Address) -> Result<User, StoreError>;

    /// Store the latest evaluation on the account and append the loan record.
    async fn record_loan(
        &self,
        id: &str,
        esg_score: u64,
        credit_amount: u64,
        record: LoanRecord,
    ) -> Result<(), StoreError>;
}

/// Validate and normalize registration input. Returns the trimmed username.
pub fn validate_registration(
    username: &str,
    email: &str,
    password: &str,
) -> Result<String, ApiError> {
    let username = username.trim();
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(ApiError::bad_request(format!(
            "Username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        )));
    }
    if !is_valid_email(email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    if password.chars().count() < PASSWORD_MIN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {PASSWORD_MIN} characters"
        )));
    }
    Ok(username.to_string())
}

fn is_word_or(c: char, extra: &[char]) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || extra.contains(&c)
}

/// `local@label.label.tld` where the tld is 2-4 characters.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || !local.chars().all(|c| is_word_or(c, &['-', '.'])) {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    let Some((tld, rest)) = labels.split_last() else {
        return false;
    };
    if rest.is_empty() {
        return false;
    }
    let tld_len = tld.chars().count();
    (2..=4).contains(&tld_len)
        && tld.chars().all(|c| is_word_or(c, &['-']))
        && rest
            .iter()
            .all(|l| !l.is_empty() && l.chars().all(|c| is_word_or(c, &['-'])))
}

/// Strict `0x` + 40 hex digits.
pub fn parse_wallet(raw: &str) -> Result<Address, ApiError> {
    let raw = raw.trim();
    let well_formed = raw.len() == 42
        && raw.starts_with("0x")
        && raw[2..].chars().all(|c| c.is_ascii_hexdigit());
    if !well_formed {
        return Err(ApiError::bad_request(format!("Invalid wallet address: {raw}")));
    }
    raw.parse::<Address>()
        .map_err(|e| ApiError::bad_request(format!("Invalid wallet address: {e}")))
}
