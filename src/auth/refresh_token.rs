/// Refresh Token Rotation
///
/// A refresh token is single-use. Presenting it mints a new pair and
/// removes the old pair's session entries, so a stale refresh token can
/// never extend a session indefinitely.

use crate::auth::claims::TokenKind;
use crate::auth::jwt::TokenPair;
use crate::auth::session::SessionManager;
use crate::error::AuthError;

impl SessionManager {
    /// Exchange a refresh token for a new pair.
    ///
    /// # Errors
    /// - `InvalidSignature` / `Expired` / `RevokedOrUnknown` if the refresh
    ///   token is not usable; nothing is changed in that case
    /// - `Signing` if the new pair cannot be minted
    /// - `Persistence` if the store fails while rotating. The old entries
    ///   may already be gone at that point, so the client has to log in again
    pub async fn refresh(&self, raw_refresh_token: &str) -> Result<TokenPair, AuthError> {
        let old = self.verifier.verify(raw_refresh_token, TokenKind::Refresh).await?;
        let user_id = old.user_id;

        let pair = self.issuer.issue_tokens(user_id)?;

        // The refresh entry is the spend marker: whoever deletes it owns the rotation.
        if self.store.delete(&old.jti).await? == 0 {
            tracing::warn!(
                user_id = user_id,
                refresh_uuid = %old.jti,
                "Refresh token was already rotated"
            );
            return Err(AuthError::RevokedOrUnknown);
        }
        self.store.delete(&old.pair).await?;

        if let Err(e) = self.store.save(user_id, &pair).await {
            tracing::error!(
                user_id = user_id,
                old_refresh_uuid = %old.jti,
                error = %e,
                "Old session revoked but new session could not be saved"
            );
            return Err(e);
        }

        tracing::info!(
            user_id = user_id,
            old_refresh_uuid = %old.jti,
            refresh_uuid = %pair.refresh_uuid,
            "Refresh token rotated"
        );
        Ok(pair)
    }
}
