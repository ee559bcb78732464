/// JWT claims carried by access and refresh tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which secret and lifetime a token is issued with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Identity the token was issued to
    pub user_id: i64,
    /// This token's own identifier, the session store key
    pub jti: Uuid,
    /// Identifier of the sibling token issued in the same pair
    pub pair: Uuid,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub iss: String,
}

impl Claims {
    pub fn new(
        user_id: i64,
        jti: Uuid,
        pair: Uuid,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        issuer: String,
    ) -> Self {
        Self {
            user_id,
            jti,
            pair,
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            iss: issuer,
        }
    }

    /// A token is expired once `now` reaches its `exp` second.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }
}
