/// Authentication module
///
/// Token issuance and verification, the session store, refresh token
/// rotation, session cookies and password hashing.

mod claims;
mod clock;
mod cookies;
mod jwt;
mod password;
mod refresh_token;
mod session;
mod session_store;

pub use claims::{Claims, TokenKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cookies::{
    access_token_from, attach_session_cookies, delete_session_cookies, ACCESS_TOKEN_COOKIE,
    REFRESH_TOKEN_COOKIE,
};
pub use jwt::{AccessDetails, TokenIssuer, TokenPair, TokenVerifier};
pub use password::{hash_password, verify_password};
pub use session::SessionManager;
pub use session_store::{MemorySessionStore, RedisSessionStore, SessionStore};
