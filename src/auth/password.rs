/// Password Hashing and Verification
///
/// Passwords are bcrypt-hashed with the configured cost. Strength rules are
/// checked before hashing so a weak password never reaches the store.

use bcrypt::{hash, verify};

use crate::error::{AppError, AuthError, ValidationError};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 72; // bcrypt ignores bytes past 72

/// Validate strength and hash a password.
///
/// # Errors
/// - Validation error if the password is too short, too long or too simple
/// - Internal error if bcrypt fails
pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    validate_password_strength(password)?;

    hash(password, cost).map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Check a password against a stored hash.
///
/// A malformed stored hash counts as a mismatch so callers only ever see
/// `InvalidCredentials`.
pub fn verify_password(password: &str, password_hash: &str) -> Result<(), AuthError> {
    match verify(password, password_hash) {
        Ok(true) => Ok(()),
        Ok(false) => Err(AuthError::InvalidCredentials),
        Err(e) => {
            tracing::error!(error = %e, "Stored password hash could not be parsed");
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Requirements: 8..=72 bytes, at least one digit, one lowercase and one
/// uppercase letter.
fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort("password".to_string(), MIN_PASSWORD_LENGTH));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong("password".to_string(), MAX_PASSWORD_LENGTH));
    }

    let has_digit = password.chars().any(|c| c.is_numeric());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_uppercase());

    if !has_digit || !has_lowercase || !has_uppercase {
        return Err(ValidationError::InvalidFormat(
            "password must contain at least one digit, one lowercase letter, and one uppercase letter"
                .to_string(),
        ));
    }

    Ok(())
}
