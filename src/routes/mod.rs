mod health_check;
mod users;
mod verification;

pub use health_check::health_check;
pub use users::{
    change_password, create_user, current_user, delete_user, get_user, login, logout, refresh,
    update_profile,
};
pub use users::{ChangePasswordRequest, LoginRequest, RefreshRequest, RegisterRequest, SessionResponse};
pub use verification::{
    reset_password, send_password_reset_email, send_verification_email, verify_email,
};
pub use verification::{ApplicationBaseUrl, EmailRequest, ResetPasswordRequest, VerifyEmailRequest};
