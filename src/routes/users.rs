/// Account Routes
///
/// Registration, login, logout, token refresh, profile and password
/// changes. Every route that hands out tokens sets them as cookies and also
/// returns them in the JSON body for header-based clients.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{
    access_token_from, attach_session_cookies, delete_session_cookies, hash_password,
    verify_password, AccessDetails, SessionManager, TokenPair, ACCESS_TOKEN_COOKIE,
    REFRESH_TOKEN_COOKIE,
};
use crate::configuration::{CookieSettings, PasswordSettings};
use crate::error::{AppError, AuthError, ErrorContext, ValidationError};
use crate::users::{NewUser, User, UserPatch, UserStore};
use crate::validators::{normalize_email, validate_username};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// Tokens handed to the client, optionally with the account they belong to
#[derive(Serialize)]
pub struct SessionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl SessionResponse {
    fn new(user: Option<User>, pair: TokenPair, sessions: &SessionManager) -> Self {
        Self {
            user,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: sessions.access_token_expiry(),
        }
    }
}

fn session_reply(
    mut builder: actix_web::HttpResponseBuilder,
    user: Option<User>,
    pair: TokenPair,
    sessions: &SessionManager,
    cookies: &CookieSettings,
) -> HttpResponse {
    attach_session_cookies(&mut builder, &pair, sessions.now(), cookies);
    builder.json(SessionResponse::new(user, pair, sessions))
}

/// POST /users
///
/// Register an account and start a session for it.
///
/// # Errors
/// - 400: invalid username, email or weak password
/// - 409: email or username already registered
/// - 503: session store unavailable
pub async fn create_user(
    form: web::Json<RegisterRequest>,
    users: web::Data<dyn UserStore>,
    sessions: web::Data<SessionManager>,
    cookies: web::Data<CookieSettings>,
    password: web::Data<PasswordSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");

    let username = validate_username(&form.username)?;
    let email = normalize_email(&form.email)?;
    let password_hash = hash_password(&form.password, password.bcrypt_cost)?;

    let user = users
        .save(&NewUser {
            username,
            email,
            password_hash,
        })
        .await
        .map_err(|e| context.record(e))?;

    let pair = sessions
        .start_session(user.id)
        .await
        .map_err(|e| context.record(e.into()))?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = user.id,
        "User registered successfully"
    );

    Ok(session_reply(HttpResponse::Created(), Some(user), pair, &sessions, &cookies))
}

/// POST /users/login
///
/// # Errors
/// - 400: malformed email
/// - 401: unknown email or wrong password (same response for both)
/// - 403: account is inactive
/// - 503: session store unavailable
pub async fn login(
    form: web::Json<LoginRequest>,
    users: web::Data<dyn UserStore>,
    sessions: web::Data<SessionManager>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let email = normalize_email(&form.email)?;

    let user = users
        .get_by_email(&email)
        .await
        .map_err(|e| context.record(e))?
        .ok_or(AuthError::InvalidCredentials)?;

    verify_password(&form.password, &user.password_hash)?;

    // Only reveal the account state to someone who knows the password.
    if !user.active {
        return Err(context.record(AuthError::AccountInactive.into()));
    }

    let pair = sessions
        .start_session(user.id)
        .await
        .map_err(|e| context.record(e.into()))?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = user.id,
        "User logged in successfully"
    );

    Ok(session_reply(HttpResponse::Ok(), Some(user), pair, &sessions, &cookies))
}

/// POST /users/logout
///
/// Always clears the session cookies and answers 200, whether or not a
/// live session was found, so the response does not reveal session state.
/// The session is revoked through the access token and, when the client
/// still holds it, through the `refresh_token` cookie as well. Only a
/// session store failure is reported.
pub async fn logout(
    req: HttpRequest,
    sessions: web::Data<SessionManager>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let access = access_token_from(req.headers(), req.cookie(ACCESS_TOKEN_COOKIE));
    let refresh = req
        .cookie(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|token| !token.is_empty());

    let mut deleted = 0;
    if let Some(token) = access {
        deleted += revoked_or_ignored(sessions.logout(&token).await)?;
    }
    if let Some(token) = refresh {
        deleted += revoked_or_ignored(sessions.logout_refresh(&token).await)?;
    }
    tracing::debug!(deleted = deleted, "Logout processed");

    let mut response = HttpResponse::Ok();
    delete_session_cookies(&mut response, &cookies);
    Ok(response.json(serde_json::json!({ "status": "ok" })))
}

fn revoked_or_ignored(result: Result<u64, AuthError>) -> Result<u64, AppError> {
    match result {
        Ok(deleted) => Ok(deleted),
        Err(e @ (AuthError::Persistence(_) | AuthError::Signing(_))) => Err(e.into()),
        Err(e) => {
            tracing::debug!(error = %e, "Logout with unusable token");
            Ok(0)
        }
    }
}

/// POST /users/token/refresh
///
/// Rotate a refresh token taken from the JSON body or, failing that, the
/// `refresh_token` cookie.
///
/// # Errors
/// - 401: missing, invalid, expired or already-used refresh token
/// - 503: session store unavailable
pub async fn refresh(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    sessions: web::Data<SessionManager>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let raw = body
        .map(|b| b.into_inner().refresh_token)
        .filter(|token| !token.is_empty())
        .or_else(|| req.cookie(REFRESH_TOKEN_COOKIE).map(|c| c.value().to_string()))
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let pair = sessions
        .refresh(&raw)
        .await
        .map_err(|e| context.record(e.into()))?;

    tracing::info!(
        request_id = %context.request_id,
        refresh_uuid = %pair.refresh_uuid,
        "Token refreshed successfully"
    );

    Ok(session_reply(HttpResponse::Ok(), None, pair, &sessions, &cookies))
}

/// GET /users/me
///
/// **Requires a live session** (see `SessionRequired`).
pub async fn current_user(
    details: web::ReqData<AccessDetails>,
    users: web::Data<dyn UserStore>,
) -> Result<HttpResponse, AppError> {
    let user = users.get(details.user_id).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// PUT /users/password
///
/// **Requires a live session.** The old password must verify and the new
/// password must be confirmed.
pub async fn change_password(
    details: web::ReqData<AccessDetails>,
    form: web::Json<ChangePasswordRequest>,
    users: web::Data<dyn UserStore>,
    password: web::Data<PasswordSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("change_password").with_user_id(details.user_id);

    if form.old_password.is_empty() || form.new_password.is_empty() {
        return Err(ValidationError::EmptyField("password".to_string()).into());
    }
    if form.new_password != form.confirm_password {
        return Err(ValidationError::InvalidFormat(
            "new_password and confirm_password must match".to_string(),
        )
        .into());
    }

    let user = users.get(details.user_id).await.map_err(|e| context.record(e))?;
    verify_password(&form.old_password, &user.password_hash)
        .map_err(|e| context.record(e.into()))?;

    let password_hash = hash_password(&form.new_password, password.bcrypt_cost)?;
    users
        .update_password(user.id, &password_hash)
        .await
        .map_err(|e| context.record(e))?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = ?context.user_id,
        "Password changed"
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

/// PATCH /users
///
/// **Requires a live session.** Change the caller's username and/or
/// email. A new email address has to be verified again.
///
/// # Errors
/// - 400: empty patch or invalid field
/// - 409: username or email taken by another account
pub async fn update_profile(
    details: web::ReqData<AccessDetails>,
    form: web::Json<UserPatch>,
    users: web::Data<dyn UserStore>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("update_profile").with_user_id(details.user_id);

    let patch = form.into_inner();
    if patch.is_empty() {
        return Err(ValidationError::EmptyField("username or email".to_string()).into());
    }
    let patch = UserPatch {
        username: patch.username.as_deref().map(validate_username).transpose()?,
        email: patch.email.as_deref().map(normalize_email).transpose()?,
    };

    let user = users
        .update_profile(details.user_id, &patch)
        .await
        .map_err(|e| context.record(e))?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = user.id,
        "Profile updated"
    );

    Ok(HttpResponse::Ok().json(user))
}

/// Account routes addressed by id only act on the caller's own account.
fn ensure_own_account(details: &AccessDetails, user_id: i64) -> Result<(), AuthError> {
    if details.user_id == user_id {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

/// GET /users/{user_id}
///
/// **Requires a live session.** 403 for any account but the caller's.
pub async fn get_user(
    details: web::ReqData<AccessDetails>,
    path: web::Path<i64>,
    users: web::Data<dyn UserStore>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    ensure_own_account(&details, user_id)?;

    let user = users.get(user_id).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// DELETE /users/{user_id}
///
/// **Requires a live session.** Closes the caller's account: it can no
/// longer log in, the current session is revoked and the cookies cleared.
pub async fn delete_user(
    details: web::ReqData<AccessDetails>,
    path: web::Path<i64>,
    users: web::Data<dyn UserStore>,
    sessions: web::Data<SessionManager>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("delete_user").with_user_id(details.user_id);

    let user_id = path.into_inner();
    ensure_own_account(&details, user_id).map_err(|e| context.record(e.into()))?;

    users.deactivate(user_id).await.map_err(|e| context.record(e))?;

    for uuid in [details.access_uuid, details.refresh_uuid] {
        sessions
            .delete_auth(&uuid)
            .await
            .map_err(|e| context.record(e.into()))?;
    }

    tracing::info!(
        request_id = %context.request_id,
        user_id = user_id,
        "Account closed"
    );

    let mut response = HttpResponse::Ok();
    delete_session_cookies(&mut response, &cookies);
    Ok(response.json(serde_json::json!({ "status": "ok" })))
}
