//! Account authentication: password hashing, JWT issuance and the bearer
//! extractors used by protected routes.

use std::time::Duration;

use anyhow::Context;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AdminSettings;
use crate::error::{ApiError, ApiResult};
use crate::users::{self, NewUser, StoreError, User, UserStore, USER_EXISTS};
use crate::AppState;

pub const BCRYPT_COST: u32 = 10;

pub async fn hash_password(plain: &str) -> anyhow::Result<String> {
    let plain = plain.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, BCRYPT_COST))
        .await
        .context("password hashing task failed")?
        .context("bcrypt hash failed")
}

pub async fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let (plain, hash) = (plain.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash))
        .await
        .context("password verification task failed")?
        .context("bcrypt verify failed")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &SecretString, ttl: Duration) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation: Validation::new(Algorithm::HS256),
            ttl,
        }
    }

    pub fn sign(&self, user: &User) -> anyhow::Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: user.id.clone(),
            email: user.email.clone(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("Failed to sign token")
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation).map(|d| d.claims)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            username: u.username.clone(),
            email: u.email.clone(),
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user: PublicUser,
    pub token: String,
}

pub async fn register(
    store: &dyn UserStore,
    keys: &JwtKeys,
    username: &str,
    email: &str,
    password: &str,
) -> ApiResult<AuthResponse> {
    let username = users::validate_registration(username, email, password)?;
    if store.exists(email, &username).await? {
        return Err(ApiError::Conflict(USER_EXISTS.into()));
    }

    let password_hash = hash_password(password).await?;
    let user = store
        .insert(NewUser {
            username,
            email: email.to_string(),
            password_hash,
            wallet_address: None,
        })
        .await?;
    info!("Registered user {} ({})", user.username, user.id);

    let token = keys.sign(&user)?;
    Ok(AuthResponse { user: PublicUser::from(&user), token })
}

pub async fn login(
    store: &dyn UserStore,
    keys: &JwtKeys,
    email: &str,
    password: &str,
) -> ApiResult<AuthResponse> {
    let invalid = || ApiError::Unauthorized("Invalid credentials".into());
    let user = store.find_by_email(email).await?.ok_or_else(invalid)?;
    if !verify_password(password, &user.password_hash).await? {
        return Err(invalid());
    }
    let token = keys.sign(&user)?;
    Ok(AuthResponse { user: PublicUser::from(&user), token })
}

/// Create the configured admin account on first start.
pub async fn bootstrap_admin(store: &dyn UserStore, admin: &AdminSettings) -> anyhow::Result<()> {
    if store.find_by_username(&admin.username).await?.is_some() {
        info!("Admin user already exists");
        return Ok(());
    }
    let password_hash = hash_password(admin.password.expose_secret()).await?;
    let result = store
        .insert(NewUser {
            username: admin.username.clone(),
            email: admin.email.clone(),
            password_hash,
            wallet_address: admin.wallet,
        })
        .await;
    match result {
        Ok(user) => {
            info!("Admin user created ({})", user.id);
            Ok(())
        }
        // Another instance won the race.
        Err(StoreError::Duplicate(_)) => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context("Failed to create admin user")),
    }
}

pub fn is_admin(user: &User, admin: &AdminSettings) -> bool {
    user.email == admin.email || user.username == admin.username
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    value
        .split_whitespace()
        .nth(1)
        .filter(|t| !t.is_empty())
}

/// Authenticated caller, resolved from `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Access token required".into()))?;
        let claims = state
            .jwt
            .verify(token)
            .map_err(|_| ApiError::Forbidden("Invalid or expired token".into()))?;
        let user = state
            .users
            .find_by_id(&claims.user_id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;
        Ok(AuthUser(user))
    }
}

/// Authenticated caller that is also the configured admin.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !is_admin(&user, &state.settings.admin) {
            return Err(ApiError::Forbidden("Admin access required".into()));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::MemoryUserStore;
    use axum::http::HeaderValue;

    fn keys() -> JwtKeys {
        JwtKeys::new(&SecretString::from("test-secret"), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_password_roundtrip() {
        let hash = hash_password("hunter22").await.unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("hunter22", &hash).await.unwrap());
        assert!(!verify_password("wrong", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let store = MemoryUserStore::new();
        let keys = keys();

        let reg = register(&store, &keys, "alice", "alice@example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(reg.user.username, "alice");
        let claims = keys.verify(&reg.token).unwrap();
        assert_eq!(claims.user_id, reg.user.id);
        assert_eq!(claims.exp - claims.iat, 3600);

        let logged = login(&store, &keys, "alice@example.com", "secret1").await.unwrap();
        assert_eq!(logged.user.id, reg.user.id);
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let store = MemoryUserStore::new();
        let keys = keys();
        register(&store, &keys, "alice", "alice@example.com", "secret1").await.unwrap();
        let err = register(&store, &keys, "alice2", "alice@example.com", "secret1")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "User already exists");
    }

    #[tokio::test]
    async fn test_login_bad_password_is_unauthorized() {
        let store = MemoryUserStore::new();
        let keys = keys();
        register(&store, &keys, "alice", "alice@example.com", "secret1").await.unwrap();

        let err = login(&store, &keys, "alice@example.com", "nope").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        let err = login(&store, &keys, "ghost@example.com", "secret1").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let user = User {
            id: "u1".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: String::new(),
            wallet_address: None,
            esg_score: None,
            credit_amount: None,
            approved: false,
            created_at: Utc::now(),
            records: vec![],
        };
        let token = keys().sign(&user).unwrap();
        let other = JwtKeys::new(&SecretString::from("other"), Duration::from_secs(3600));
        assert!(other.verify(&token).is_err());
        assert!(keys().verify(&token).is_ok());
    }

    #[tokio::test]
    async fn test_bootstrap_admin_is_idempotent() {
        let store = MemoryUserStore::new();
        let admin = AdminSettings::default();
        bootstrap_admin(&store, &admin).await.unwrap();
        bootstrap_admin(&store, &admin).await.unwrap();
        assert_eq!(store.len().await, 1);

        let user = store.find_by_username("admin").await.unwrap().unwrap();
        assert!(is_admin(&user, &admin));
        assert_eq!(user.wallet_address, admin.wallet);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert!(bearer_token(&headers).is_none());
    }
}
