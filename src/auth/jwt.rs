/// JWT Token Issuance and Verification
///
/// `TokenIssuer` mints access/refresh pairs; `TokenVerifier` checks
/// signature, expiry and that the token's identifier is still present in
/// the session store.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenKind};
use crate::auth::clock::Clock;
use crate::auth::session_store::SessionStore;
use crate::configuration::JwtSettings;
use crate::error::AuthError;

/// Freshly issued access and refresh tokens.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub access_uuid: Uuid,
    pub access_expires: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_uuid: Uuid,
    pub refresh_expires: DateTime<Utc>,
}

/// Identity and token identifiers recovered from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDetails {
    pub user_id: i64,
    pub access_uuid: Uuid,
    /// The refresh token issued alongside this access token
    pub refresh_uuid: Uuid,
}

fn secret_for<'a>(settings: &'a JwtSettings, kind: TokenKind) -> &'a [u8] {
    match kind {
        TokenKind::Access => settings.access_secret.as_bytes(),
        TokenKind::Refresh => settings.refresh_secret.as_bytes(),
    }
}

fn expiry_after(now: DateTime<Utc>, seconds: i64, kind: TokenKind) -> Result<DateTime<Utc>, AuthError> {
    Duration::try_seconds(seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| AuthError::Signing(format!("{} token expiry out of range: {}s", kind.as_str(), seconds)))
}

pub struct TokenIssuer {
    settings: JwtSettings,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(settings: JwtSettings, clock: Arc<dyn Clock>) -> Self {
        Self { settings, clock }
    }

    /// Issue a new access/refresh pair for `user_id`.
    ///
    /// # Errors
    /// Returns `AuthError::Signing` if an expiry is out of range or encoding fails
    pub fn issue_tokens(&self, user_id: i64) -> Result<TokenPair, AuthError> {
        let now = self.clock.now();
        let access_uuid = Uuid::new_v4();
        let refresh_uuid = Uuid::new_v4();
        let access_expires = expiry_after(now, self.settings.access_token_expiry, TokenKind::Access)?;
        let refresh_expires = expiry_after(now, self.settings.refresh_token_expiry, TokenKind::Refresh)?;

        let access_claims = Claims::new(
            user_id,
            access_uuid,
            refresh_uuid,
            now,
            access_expires,
            self.settings.issuer.clone(),
        );
        let refresh_claims = Claims::new(
            user_id,
            refresh_uuid,
            access_uuid,
            now,
            refresh_expires,
            self.settings.issuer.clone(),
        );

        Ok(TokenPair {
            access_token: self.sign(&access_claims, TokenKind::Access)?,
            access_uuid,
            access_expires,
            refresh_token: self.sign(&refresh_claims, TokenKind::Refresh)?,
            refresh_uuid,
            refresh_expires,
        })
    }

    fn sign(&self, claims: &Claims, kind: TokenKind) -> Result<String, AuthError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret_for(&self.settings, kind)),
        )
        .map_err(|e| AuthError::Signing(format!("{} token: {}", kind.as_str(), e)))
    }
}

pub struct TokenVerifier {
    settings: JwtSettings,
    clock: Arc<dyn Clock>,
    store: Arc<dyn SessionStore>,
}

impl TokenVerifier {
    pub fn new(settings: JwtSettings, clock: Arc<dyn Clock>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            settings,
            clock,
            store,
        }
    }

    /// Check signature, issuer and expiry without consulting the store.
    ///
    /// Expiry is checked against the injected clock rather than by
    /// `jsonwebtoken`, so it is reported separately and without leeway.
    pub fn decode(&self, raw: &str, kind: TokenKind) -> Result<Claims, AuthError> {
        let claims = self.decode_signed(raw, kind)?;

        if claims.is_expired_at(self.clock.now()) {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }

    /// Check signature and issuer only. An expired token still names the
    /// session it belonged to, which is all revocation needs.
    pub fn decode_signed(&self, raw: &str, kind: TokenKind) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_issuer(&[&self.settings.issuer]);

        decode::<Claims>(
            raw,
            &DecodingKey::from_secret(secret_for(&self.settings, kind)),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(kind = kind.as_str(), error = %e, "JWT rejected");
            AuthError::InvalidSignature
        })
    }

    /// Decode and require the token's identifier to still be active.
    pub async fn verify(&self, raw: &str, kind: TokenKind) -> Result<Claims, AuthError> {
        let claims = self.decode(raw, kind)?;

        let owner = self
            .store
            .lookup(&claims.jti)
            .await
            .map_err(|e| match e {
                AuthError::NotFound => AuthError::RevokedOrUnknown,
                other => other,
            })?;

        if owner != claims.user_id {
            tracing::warn!(
                uuid = %claims.jti,
                user_id = claims.user_id,
                "Session entry belongs to a different user"
            );
            return Err(AuthError::RevokedOrUnknown);
        }

        Ok(claims)
    }

    /// Verify an access token and return who it belongs to.
    pub async fn extract(&self, raw: &str) -> Result<AccessDetails, AuthError> {
        let claims = self.verify(raw, TokenKind::Access).await?;
        Ok(AccessDetails {
            user_id: claims.user_id,
            access_uuid: claims.jti,
            refresh_uuid: claims.pair,
        })
    }
}
