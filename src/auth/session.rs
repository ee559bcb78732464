/// Session lifecycle
///
/// Ties the issuer, verifier and store together: start a session on
/// login, resolve it on each request, end it on logout. Token rotation
/// lives in `refresh_token.rs`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::claims::TokenKind;
use crate::auth::clock::Clock;
use crate::auth::jwt::{AccessDetails, TokenIssuer, TokenPair, TokenVerifier};
use crate::auth::session_store::SessionStore;
use crate::configuration::JwtSettings;
use crate::error::AuthError;

pub struct SessionManager {
    pub(crate) issuer: TokenIssuer,
    pub(crate) verifier: TokenVerifier,
    pub(crate) store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    access_token_expiry: i64,
}

impl SessionManager {
    pub fn new(settings: JwtSettings, store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            access_token_expiry: settings.access_token_expiry,
            issuer: TokenIssuer::new(settings.clone(), clock.clone()),
            verifier: TokenVerifier::new(settings, clock.clone(), store.clone()),
            store,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Access token lifetime in seconds, reported to clients as `expires_in`.
    pub fn access_token_expiry(&self) -> i64 {
        self.access_token_expiry
    }

    pub fn issue_tokens(&self, user_id: i64) -> Result<TokenPair, AuthError> {
        self.issuer.issue_tokens(user_id)
    }

    pub async fn save_auth(&self, user_id: i64, pair: &TokenPair) -> Result<(), AuthError> {
        self.store.save(user_id, pair).await
    }

    /// Issue a pair and record it. The pair is never returned without its
    /// session entries.
    pub async fn start_session(&self, user_id: i64) -> Result<TokenPair, AuthError> {
        let pair = self.issue_tokens(user_id)?;
        self.save_auth(user_id, &pair).await.map_err(|e| {
            tracing::error!(user_id = user_id, error = %e, "Failed to persist new session");
            e
        })?;

        tracing::info!(
            user_id = user_id,
            access_uuid = %pair.access_uuid,
            refresh_uuid = %pair.refresh_uuid,
            "Session started"
        );
        Ok(pair)
    }

    pub async fn extract(&self, raw_access_token: &str) -> Result<AccessDetails, AuthError> {
        self.verifier.extract(raw_access_token).await
    }

    pub async fn lookup(&self, uuid: &Uuid) -> Result<i64, AuthError> {
        self.store.lookup(uuid).await
    }

    pub async fn delete_auth(&self, uuid: &Uuid) -> Result<u64, AuthError> {
        self.store.delete(uuid).await
    }

    /// End the session an access token belongs to, removing both the access
    /// entry and its paired refresh entry. Returns how many entries went away;
    /// zero is a normal outcome for a session that already ended.
    ///
    /// An expired access token is still accepted here. Only its signature is
    /// checked, so a client that idled past the access lifetime can still
    /// revoke the refresh token that would otherwise outlive the logout.
    pub async fn logout(&self, raw_access_token: &str) -> Result<u64, AuthError> {
        self.revoke(raw_access_token, TokenKind::Access).await
    }

    /// Same as `logout`, starting from the refresh half of the pair.
    pub async fn logout_refresh(&self, raw_refresh_token: &str) -> Result<u64, AuthError> {
        self.revoke(raw_refresh_token, TokenKind::Refresh).await
    }

    async fn revoke(&self, raw: &str, kind: TokenKind) -> Result<u64, AuthError> {
        let claims = self.verifier.decode_signed(raw, kind)?;

        let deleted = self.delete_auth(&claims.jti).await? + self.delete_auth(&claims.pair).await?;

        tracing::info!(
            user_id = claims.user_id,
            token_kind = kind.as_str(),
            uuid = %claims.jti,
            deleted = deleted,
            "Session ended"
        );
        Ok(deleted)
    }
}
