/// User persistence
///
/// `UserStore` is the seam handlers depend on. `PgUserStore` owns the
/// field <-> column mapping for Postgres; `MemoryUserStore` keeps accounts
/// in process for single-node runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use crate::error::{AppError, DatabaseError};
use crate::users::model::{NewUser, User, UserPatch, DEFAULT_ROLE};

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new account. Duplicate email or username is a conflict.
    async fn save(&self, user: &NewUser) -> Result<User, AppError>;

    async fn get(&self, id: i64) -> Result<User, AppError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), AppError>;

    async fn verify_email(&self, id: i64) -> Result<(), AppError>;

    /// Apply already-validated profile changes. A changed email must be
    /// verified again.
    async fn update_profile(&self, id: i64, patch: &UserPatch) -> Result<User, AppError>;

    /// Close an account. The row is kept; the account can no longer log in.
    async fn deactivate(&self, id: i64) -> Result<(), AppError>;
}

/// Columns selected for every user query, matching `UserRow`.
const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, active, email_verified, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    active: bool,
    email_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role,
            active: row.active,
            email_verified: row.email_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_flag(&self, assignment: &'static str, id: i64) -> Result<(), AppError> {
        let query = format!("UPDATE users SET {}, updated_at = $1 WHERE id = $2", assignment);
        let result = sqlx::query(&query)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("user".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn save(&self, user: &NewUser) -> Result<User, AppError> {
        let now = Utc::now();
        let query = format!(
            r#"
            INSERT INTO users (username, email, password_hash, role, active, email_verified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, true, false, $5, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(DEFAULT_ROLE)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    async fn get(&self, id: i64) -> Result<User, AppError> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("user".to_string()))?;

        Ok(row.into())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(User::from))
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(password_hash)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("user".to_string()).into());
        }
        Ok(())
    }

    async fn verify_email(&self, id: i64) -> Result<(), AppError> {
        self.set_flag("email_verified = true", id).await
    }

    async fn update_profile(&self, id: i64, patch: &UserPatch) -> Result<User, AppError> {
        let query = format!(
            r#"
            UPDATE users SET
                username = COALESCE($1, username),
                email_verified = CASE WHEN $2::TEXT IS NULL OR $2 = email THEN email_verified ELSE false END,
                email = COALESCE($2, email),
                updated_at = $3
            WHERE id = $4
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(patch.username.as_deref())
            .bind(patch.email.as_deref())
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("user".to_string()))?;

        Ok(row.into())
    }

    async fn deactivate(&self, id: i64) -> Result<(), AppError> {
        self.set_flag("active = false", id).await
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<i64, User>>,
    next_id: AtomicI64,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, id: i64, change: F) -> Result<User, AppError>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::NotFound("user".to_string()))?;
        change(user);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn save(&self, user: &NewUser) -> Result<User, AppError> {
        let mut users = self.users.write().await;

        if users
            .values()
            .any(|u| u.email == user.email || u.username == user.username)
        {
            return Err(DatabaseError::UniqueConstraintViolation(
                "Email or username already registered".to_string(),
            )
            .into());
        }

        let now = Utc::now();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = User {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            role: DEFAULT_ROLE.to_string(),
            active: true,
            email_verified: false,
            created_at: now,
            updated_at: now,
        };
        users.insert(id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: i64) -> Result<User, AppError> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DatabaseError::NotFound("user".to_string()).into())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), AppError> {
        self.modify(id, |user| user.password_hash = password_hash.to_string())
            .await
            .map(|_| ())
    }

    async fn verify_email(&self, id: i64) -> Result<(), AppError> {
        self.modify(id, |user| user.email_verified = true).await.map(|_| ())
    }

    async fn update_profile(&self, id: i64, patch: &UserPatch) -> Result<User, AppError> {
        let mut users = self.users.write().await;

        let taken = users.values().any(|u| {
            u.id != id
                && (patch.username.as_deref() == Some(u.username.as_str())
                    || patch.email.as_deref() == Some(u.email.as_str()))
        });
        if taken {
            return Err(DatabaseError::UniqueConstraintViolation(
                "Email or username already registered".to_string(),
            )
            .into());
        }

        let user = users
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::NotFound("user".to_string()))?;
        if let Some(username) = &patch.username {
            user.username = username.clone();
        }
        if let Some(email) = &patch.email {
            if *email != user.email {
                user.email = email.clone();
                user.email_verified = false;
            }
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn deactivate(&self, id: i64) -> Result<(), AppError> {
        self.modify(id, |user| user.active = false).await.map(|_| ())
    }
}
