/// One-time account tokens
///
/// Email verification and password reset links carry a random token. Only
/// its SHA-256 digest is stored, and a token is consumed by the lookup
/// that redeems it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::AppError;

const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::EmailVerification => "email_verification",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            TokenPurpose::EmailVerification => Duration::hours(24),
            TokenPurpose::PasswordReset => Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserToken {
    pub token_hash: String,
    pub user_id: i64,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
}

impl UserToken {
    /// Create a token for `user_id`. Returns the raw value for the email
    /// link together with the record to store.
    pub fn generate(user_id: i64, purpose: TokenPurpose, now: DateTime<Utc>) -> (String, Self) {
        let raw: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();

        let token = Self {
            token_hash: Self::hash(&raw),
            user_id,
            purpose,
            expires_at: now + purpose.ttl(),
        };
        (raw, token)
    }

    pub fn hash(raw: &str) -> String {
        format!("{:x}", Sha256::digest(raw.as_bytes()))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[async_trait]
pub trait UserTokenStore: Send + Sync {
    async fn save(&self, token: &UserToken) -> Result<(), AppError>;

    /// Remove and return the token with this digest and purpose, if any.
    async fn take(&self, token_hash: &str, purpose: TokenPurpose) -> Result<Option<UserToken>, AppError>;

    /// Invalidate every outstanding token of one purpose for a user.
    async fn delete_for_user(&self, user_id: i64, purpose: TokenPurpose) -> Result<u64, AppError>;
}

pub struct PgUserTokenStore {
    pool: PgPool,
}

impl PgUserTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserTokenStore for PgUserTokenStore {
    async fn save(&self, token: &UserToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_tokens (token_hash, user_id, purpose, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(token.purpose.as_str())
        .bind(token.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take(&self, token_hash: &str, purpose: TokenPurpose) -> Result<Option<UserToken>, AppError> {
        let row = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            r#"
            DELETE FROM user_tokens
            WHERE token_hash = $1 AND purpose = $2
            RETURNING user_id, expires_at
            "#,
        )
        .bind(token_hash)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, expires_at)| UserToken {
            token_hash: token_hash.to_string(),
            user_id,
            purpose,
            expires_at,
        }))
    }

    async fn delete_for_user(&self, user_id: i64, purpose: TokenPurpose) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM user_tokens WHERE user_id = $1 AND purpose = $2")
            .bind(user_id)
            .bind(purpose.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Default)]
pub struct MemoryUserTokenStore {
    tokens: RwLock<HashMap<String, UserToken>>,
}

impl MemoryUserTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserTokenStore for MemoryUserTokenStore {
    async fn save(&self, token: &UserToken) -> Result<(), AppError> {
        self.tokens
            .write()
            .await
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn take(&self, token_hash: &str, purpose: TokenPurpose) -> Result<Option<UserToken>, AppError> {
        let mut tokens = self.tokens.write().await;
        match tokens.get(token_hash) {
            Some(token) if token.purpose == purpose => Ok(tokens.remove(token_hash)),
            _ => Ok(None),
        }
    }

    async fn delete_for_user(&self, user_id: i64, purpose: TokenPurpose) -> Result<u64, AppError> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| !(t.user_id == user_id && t.purpose == purpose));
        Ok((before - tokens.len()) as u64)
    }
}
