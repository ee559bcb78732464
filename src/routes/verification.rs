/// Email Verification and Password Reset Routes
///
/// Both flows mail a one-time link. The `send` routes answer 200 whether or
/// not the address belongs to an account.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::{hash_password, SessionManager};
use crate::configuration::PasswordSettings;
use crate::email_client::EmailSender;
use crate::error::{AppError, ErrorContext, ValidationError};
use crate::users::{TokenPurpose, User, UserStore, UserToken, UserTokenStore};
use crate::validators::normalize_email;

/// Public origin used in links sent by email.
pub struct ApplicationBaseUrl(pub String);

#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

fn accepted() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Replace any outstanding token of this purpose and return the new raw value.
async fn issue_token(
    tokens: &dyn UserTokenStore,
    user_id: i64,
    purpose: TokenPurpose,
    now: DateTime<Utc>,
) -> Result<String, AppError> {
    tokens.delete_for_user(user_id, purpose).await?;
    let (raw, token) = UserToken::generate(user_id, purpose, now);
    tokens.save(&token).await?;
    Ok(raw)
}

async fn redeem_token(
    tokens: &dyn UserTokenStore,
    raw: &str,
    purpose: TokenPurpose,
    now: DateTime<Utc>,
) -> Result<UserToken, AppError> {
    if raw.trim().is_empty() {
        return Err(ValidationError::EmptyField("token".to_string()).into());
    }

    let token = tokens
        .take(&UserToken::hash(raw), purpose)
        .await?
        .filter(|token| !token.is_expired_at(now))
        .ok_or_else(|| ValidationError::InvalidToken(purpose.as_str().to_string()))?;
    Ok(token)
}

fn link(base_url: &ApplicationBaseUrl, path: &str, raw: &str) -> String {
    format!("{}{}?token={}", base_url.0.trim_end_matches('/'), path, raw)
}

/// Issue a token and mail the link. Delivery failures are logged, not
/// returned, so the response does not depend on the mail service.
async fn mail_link(
    context: &ErrorContext,
    tokens: &dyn UserTokenStore,
    email: &dyn EmailSender,
    user: &User,
    purpose: TokenPurpose,
    base_url: &ApplicationBaseUrl,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let raw = issue_token(tokens, user.id, purpose, now)
        .await
        .map_err(|e| context.record(e))?;

    let (subject, html) = match purpose {
        TokenPurpose::EmailVerification => (
            "Confirm your email address",
            format!(
                "Welcome to the store!<br />Click <a href=\"{}\">here</a> to confirm your email address.",
                link(base_url, "/users/email/verify", &raw)
            ),
        ),
        TokenPurpose::PasswordReset => (
            "Reset your password",
            format!(
                "Click <a href=\"{}\">here</a> to choose a new password. The link is valid for one hour.",
                link(base_url, "/users/password/reset", &raw)
            ),
        ),
    };

    if let Err(e) = email.send_email(&user.email, subject, &html).await {
        context.log_error(&e);
    }
    Ok(())
}

/// POST /users/email/verify/send
///
/// Mail a verification link to an unverified account.
pub async fn send_verification_email(
    form: web::Json<EmailRequest>,
    users: web::Data<dyn UserStore>,
    tokens: web::Data<dyn UserTokenStore>,
    email: web::Data<dyn EmailSender>,
    base_url: web::Data<ApplicationBaseUrl>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("send_verification_email");
    let address = normalize_email(&form.email)?;

    match users.get_by_email(&address).await.map_err(|e| context.record(e))? {
        Some(user) if !user.email_verified => {
            mail_link(
                &context,
                tokens.get_ref(),
                email.get_ref(),
                &user,
                TokenPurpose::EmailVerification,
                &base_url,
                sessions.now(),
            )
            .await?;
            tracing::info!(
                request_id = %context.request_id,
                user_id = user.id,
                "Verification email sent"
            );
        }
        Some(user) => {
            tracing::debug!(user_id = user.id, "Email already verified");
        }
        None => {
            tracing::debug!("Verification requested for unknown email");
        }
    }

    Ok(accepted())
}

/// POST /users/email/verify
///
/// # Errors
/// - 400: empty, unknown, used or expired token
pub async fn verify_email(
    form: web::Json<VerifyEmailRequest>,
    users: web::Data<dyn UserStore>,
    tokens: web::Data<dyn UserTokenStore>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("verify_email");

    let token = redeem_token(
        tokens.get_ref(),
        &form.token,
        TokenPurpose::EmailVerification,
        sessions.now(),
    )
    .await?;

    users
        .verify_email(token.user_id)
        .await
        .map_err(|e| context.record(e))?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = token.user_id,
        "Email verified"
    );

    Ok(accepted())
}

/// POST /users/password/reset/send
///
/// Mail a reset link to an active account.
pub async fn send_password_reset_email(
    form: web::Json<EmailRequest>,
    users: web::Data<dyn UserStore>,
    tokens: web::Data<dyn UserTokenStore>,
    email: web::Data<dyn EmailSender>,
    base_url: web::Data<ApplicationBaseUrl>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("send_password_reset_email");
    let address = normalize_email(&form.email)?;

    match users.get_by_email(&address).await.map_err(|e| context.record(e))? {
        Some(user) if user.active => {
            mail_link(
                &context,
                tokens.get_ref(),
                email.get_ref(),
                &user,
                TokenPurpose::PasswordReset,
                &base_url,
                sessions.now(),
            )
            .await?;
            tracing::info!(
                request_id = %context.request_id,
                user_id = user.id,
                "Password reset email sent"
            );
        }
        _ => {
            tracing::debug!("Password reset requested for unknown or inactive account");
        }
    }

    Ok(accepted())
}

/// POST /users/password/reset
///
/// Sessions issued before the reset stay valid until they expire or are
/// logged out.
///
/// # Errors
/// - 400: weak password, or empty, unknown, used or expired token
pub async fn reset_password(
    form: web::Json<ResetPasswordRequest>,
    users: web::Data<dyn UserStore>,
    tokens: web::Data<dyn UserTokenStore>,
    sessions: web::Data<SessionManager>,
    password: web::Data<PasswordSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("reset_password");

    // A rejected password must not use up the token.
    let password_hash = hash_password(&form.password, password.bcrypt_cost)?;

    let token = redeem_token(
        tokens.get_ref(),
        &form.token,
        TokenPurpose::PasswordReset,
        sessions.now(),
    )
    .await?;

    users
        .update_password(token.user_id, &password_hash)
        .await
        .map_err(|e| context.record(e))?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = token.user_id,
        "Password reset"
    );

    Ok(accepted())
}
