/// Session cookies and bearer header handling
///
/// Tokens reach the client as two HttpOnly cookies. Requests may present
/// the access token either as `Authorization: Bearer <token>` or through
/// the `access_token` cookie; the header wins when both are present.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use actix_web::HttpResponseBuilder;
use chrono::{DateTime, Utc};

use crate::auth::jwt::TokenPair;
use crate::configuration::CookieSettings;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

fn session_cookie(
    name: &'static str,
    value: String,
    expires: Option<(DateTime<Utc>, DateTime<Utc>)>,
    settings: &CookieSettings,
) -> Cookie<'static> {
    let mut builder = Cookie::build(name, value)
        .path("/")
        .http_only(true)
        .secure(settings.secure)
        .same_site(SameSite::Lax);

    if let Some(domain) = &settings.domain {
        builder = builder.domain(domain.clone());
    }
    if let Some((now, expires_at)) = expires {
        let seconds = (expires_at - now).num_seconds().max(0);
        builder = builder.max_age(CookieDuration::seconds(seconds));
    }

    builder.finish()
}

/// Set both session cookies on a response.
pub fn attach_session_cookies(
    response: &mut HttpResponseBuilder,
    pair: &TokenPair,
    now: DateTime<Utc>,
    settings: &CookieSettings,
) {
    response.cookie(session_cookie(
        ACCESS_TOKEN_COOKIE,
        pair.access_token.clone(),
        Some((now, pair.access_expires)),
        settings,
    ));
    response.cookie(session_cookie(
        REFRESH_TOKEN_COOKIE,
        pair.refresh_token.clone(),
        Some((now, pair.refresh_expires)),
        settings,
    ));
}

/// Overwrite both session cookies with expired, empty ones.
pub fn delete_session_cookies(response: &mut HttpResponseBuilder, settings: &CookieSettings) {
    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE] {
        let mut cookie = session_cookie(name, String::new(), None, settings);
        cookie.make_removal();
        response.cookie(cookie);
    }
}

/// Pull the access token from the Authorization header, falling back to
/// the cookie value.
pub fn access_token_from(headers: &HeaderMap, cookie: Option<Cookie<'static>>) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    bearer.or_else(|| {
        cookie
            .map(|c| c.value().to_string())
            .filter(|value| !value.is_empty())
    })
}
