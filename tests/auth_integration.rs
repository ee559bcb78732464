use async_trait::async_trait;
use chrono::Duration;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use storefront::auth::{Clock, ManualClock, MemorySessionStore, SessionManager};
use storefront::configuration::{CookieSettings, JwtSettings, PasswordSettings};
use storefront::email_client::EmailSender;
use storefront::error::AppError;
use storefront::startup::{run, Services};
use storefront::users::{MemoryUserStore, MemoryUserTokenStore, UserStore};

/// Keeps every outgoing email instead of delivering it.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<SentEmail>>,
}

#[derive(Clone, Debug)]
pub struct SentEmail {
    pub recipient: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_email(&self, recipient: &str, subject: &str, html_content: &str) -> Result<(), AppError> {
        self.sent.lock().unwrap().push(SentEmail {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            html: html_content.to_string(),
        });
        Ok(())
    }
}

impl RecordingEmailSender {
    fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    /// Raw token from the link in the most recent email.
    fn last_token(&self) -> String {
        let last = self.sent().pop().expect("no email was sent");
        let start = last.html.find("token=").expect("no token in email") + "token=".len();
        last.html[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect()
    }
}

pub struct TestApp {
    pub address: String,
    pub users: Arc<MemoryUserStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub email: Arc<RecordingEmailSender>,
    pub clock: Arc<ManualClock>,
}

fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let jwt = JwtSettings {
        access_secret: "http-test-access-secret".to_string(),
        refresh_secret: "http-test-refresh-secret".to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 604800,
        issuer: "storefront-test".to_string(),
    };
    let clock = Arc::new(ManualClock::default());
    let shared_clock: Arc<dyn Clock> = clock.clone();
    let session_store = Arc::new(MemorySessionStore::new(shared_clock.clone()));
    let users = Arc::new(MemoryUserStore::new());
    let email = Arc::new(RecordingEmailSender::default());
    let sessions = Arc::new(SessionManager::new(jwt, session_store.clone(), shared_clock));

    let services = Services {
        users: users.clone(),
        tokens: Arc::new(MemoryUserTokenStore::new()),
        sessions,
        email: email.clone(),
    };
    let server = run(
        listener,
        services,
        CookieSettings {
            secure: false,
            domain: None,
        },
        PasswordSettings { bcrypt_cost: 4 },
        "http://shop.test".to_string(),
    )
    .expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        users,
        sessions: session_store,
        email,
        clock,
    }
}

impl TestApp {
    async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(&format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn register(&self, username: &str, email: &str) -> Value {
        let response = self
            .post_json(
                "/users",
                &json!({
                    "username": username,
                    "email": email,
                    "password": "SecurePass123"
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    async fn send_authed(
        &self,
        method: reqwest::Method,
        path: &str,
        access_token: &str,
        body: Option<&Value>,
    ) -> reqwest::Response {
        let mut request = reqwest::Client::new()
            .request(method, &format!("{}{}", self.address, path))
            .bearer_auth(access_token);
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.expect("Failed to execute request.")
    }

    async fn get_me(&self, access_token: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(&format!("{}/users/me", self.address))
            .bearer_auth(access_token)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

fn token(body: &Value, name: &str) -> String {
    body[name].as_str().expect("token missing").to_string()
}

fn set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

// --- Registration ---

#[tokio::test]
async fn register_returns_201_with_tokens_and_cookies() {
    let app = spawn_app();

    let response = app
        .post_json(
            "/users",
            &json!({
                "username": "johndoe",
                "email": "John@Example.com",
                "password": "SecurePass123"
            }),
        )
        .await;
    assert_eq!(201, response.status().as_u16());

    let cookies = set_cookies(&response);
    assert!(cookies.iter().any(|c| c.starts_with("access_token=") && c.contains("HttpOnly")));
    assert!(cookies.iter().any(|c| c.starts_with("refresh_token=")));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert_eq!(body["user"]["email"], "john@example.com");
    assert!(body["user"].get("password_hash").is_none());
    assert_eq!(app.sessions.len().await, 2);
}

#[tokio::test]
async fn register_returns_400_for_invalid_input() {
    let app = spawn_app();

    let cases = vec![
        (json!({"username": "johndoe", "email": "notanemail", "password": "SecurePass123"}), "invalid email"),
        (json!({"username": "jo", "email": "john@example.com", "password": "SecurePass123"}), "short username"),
        (json!({"username": "johndoe", "email": "john@example.com", "password": "short"}), "weak password"),
        (json!({"username": "johndoe", "email": "john@example.com", "password": "nouppercase123"}), "no uppercase"),
        (json!({"email": "john@example.com", "password": "SecurePass123"}), "missing username"),
    ];

    for (body, reason) in cases {
        let response = app.post_json("/users", &body).await;
        assert_eq!(400, response.status().as_u16(), "Should reject: {}", reason);
    }
    assert!(app.sessions.is_empty().await);
}

#[tokio::test]
async fn register_returns_409_for_duplicate_email() {
    let app = spawn_app();
    app.register("johndoe", "john@example.com").await;

    let response = app
        .post_json(
            "/users",
            &json!({
                "username": "someoneelse",
                "email": "john@example.com",
                "password": "SecurePass123"
            }),
        )
        .await;
    assert_eq!(409, response.status().as_u16());
}

// --- Login ---

#[tokio::test]
async fn login_returns_tokens_for_valid_credentials() {
    let app = spawn_app();
    app.register("johndoe", "john@example.com").await;

    let response = app
        .post_json(
            "/users/login",
            &json!({"email": "john@example.com", "password": "SecurePass123"}),
        )
        .await;
    assert_eq!(200, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    let me = app.get_me(&token(&body, "access_token")).await;
    assert_eq!(200, me.status().as_u16());

    let me: Value = me.json().await.unwrap();
    assert_eq!(me["username"], "johndoe");
}

#[tokio::test]
async fn login_uses_same_response_for_unknown_email_and_wrong_password() {
    let app = spawn_app();
    app.register("johndoe", "john@example.com").await;

    let wrong_password = app
        .post_json(
            "/users/login",
            &json!({"email": "john@example.com", "password": "WrongPass123"}),
        )
        .await;
    let unknown_email = app
        .post_json(
            "/users/login",
            &json!({"email": "nobody@example.com", "password": "SecurePass123"}),
        )
        .await;

    assert_eq!(401, wrong_password.status().as_u16());
    assert_eq!(401, unknown_email.status().as_u16());

    let a: Value = wrong_password.json().await.unwrap();
    let b: Value = unknown_email.json().await.unwrap();
    assert_eq!(a["code"], b["code"]);
    assert_eq!(a["message"], b["message"]);
}

#[tokio::test]
async fn login_returns_403_for_inactive_account() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;
    let id = registered["user"]["id"].as_i64().unwrap();
    let closed = app
        .send_authed(reqwest::Method::DELETE, &format!("/users/{}", id), &token(&registered, "access_token"), None)
        .await;
    assert_eq!(200, closed.status().as_u16());

    let response = app
        .post_json(
            "/users/login",
            &json!({"email": "john@example.com", "password": "SecurePass123"}),
        )
        .await;
    assert_eq!(403, response.status().as_u16());
}

// --- Protected routes ---

#[tokio::test]
async fn me_returns_401_without_token() {
    let app = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/users/me", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(401, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn me_returns_401_for_forged_token() {
    let app = spawn_app();
    let response = app.get_me("eyJhbGciOiJIUzI1NiJ9.e30.forged").await;
    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn me_accepts_access_token_cookie() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;

    let response = reqwest::Client::new()
        .get(&format!("{}/users/me", app.address))
        .header("Cookie", format!("access_token={}", token(&registered, "access_token")))
        .send()
        .await
        .unwrap();
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn refresh_token_is_not_accepted_as_access_token() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;

    let response = app.get_me(&token(&registered, "refresh_token")).await;
    assert_eq!(401, response.status().as_u16());
}

// --- Logout ---

#[tokio::test]
async fn logout_revokes_session_and_clears_cookies() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;
    let access = token(&registered, "access_token");

    let response = reqwest::Client::new()
        .post(&format!("{}/users/logout", app.address))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(200, response.status().as_u16());

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));

    assert!(app.sessions.is_empty().await);
    assert_eq!(401, app.get_me(&access).await.status().as_u16());
}

#[tokio::test]
async fn logout_succeeds_without_a_live_session() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;
    let access = token(&registered, "access_token");

    for _ in 0..2 {
        let response = reqwest::Client::new()
            .post(&format!("{}/users/logout", app.address))
            .bearer_auth(&access)
            .send()
            .await
            .unwrap();
        assert_eq!(200, response.status().as_u16());
    }

    let anonymous = reqwest::Client::new()
        .post(&format!("{}/users/logout", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(200, anonymous.status().as_u16());
}

// --- Refresh ---

#[tokio::test]
async fn refresh_rotates_tokens() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;
    let old_access = token(&registered, "access_token");
    let old_refresh = token(&registered, "refresh_token");

    let response = app
        .post_json("/users/token/refresh", &json!({"refresh_token": old_refresh}))
        .await;
    assert_eq!(200, response.status().as_u16());
    assert_eq!(set_cookies(&response).len(), 2);

    let body: Value = response.json().await.unwrap();
    let new_access = token(&body, "access_token");
    assert_ne!(new_access, old_access);

    assert_eq!(200, app.get_me(&new_access).await.status().as_u16());
    assert_eq!(401, app.get_me(&old_access).await.status().as_u16());

    let replay = app
        .post_json("/users/token/refresh", &json!({"refresh_token": old_refresh}))
        .await;
    assert_eq!(401, replay.status().as_u16());
}

#[tokio::test]
async fn refresh_reads_cookie_when_body_is_absent() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;

    let response = reqwest::Client::new()
        .post(&format!("{}/users/token/refresh", app.address))
        .header("Cookie", format!("refresh_token={}", token(&registered, "refresh_token")))
        .send()
        .await
        .unwrap();
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn refresh_without_token_returns_401() {
    let app = spawn_app();

    let response = reqwest::Client::new()
        .post(&format!("{}/users/token/refresh", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(401, response.status().as_u16());
}

// --- Password change ---

#[tokio::test]
async fn change_password_requires_old_password() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;
    let access = token(&registered, "access_token");
    let client = reqwest::Client::new();

    let mismatch = client
        .put(&format!("{}/users/password", app.address))
        .bearer_auth(&access)
        .json(&json!({
            "old_password": "SecurePass123",
            "new_password": "NewSecurePass456",
            "confirm_password": "Different456"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(400, mismatch.status().as_u16());

    let wrong_old = client
        .put(&format!("{}/users/password", app.address))
        .bearer_auth(&access)
        .json(&json!({
            "old_password": "WrongPass123",
            "new_password": "NewSecurePass456",
            "confirm_password": "NewSecurePass456"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(401, wrong_old.status().as_u16());

    let changed = client
        .put(&format!("{}/users/password", app.address))
        .bearer_auth(&access)
        .json(&json!({
            "old_password": "SecurePass123",
            "new_password": "NewSecurePass456",
            "confirm_password": "NewSecurePass456"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(200, changed.status().as_u16());

    let login = app
        .post_json(
            "/users/login",
            &json!({"email": "john@example.com", "password": "NewSecurePass456"}),
        )
        .await;
    assert_eq!(200, login.status().as_u16());
}

// --- Logout after expiry ---

#[tokio::test]
async fn logout_with_expired_access_token_revokes_refresh_token() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;
    let access = token(&registered, "access_token");
    let refresh = token(&registered, "refresh_token");

    app.clock.advance(Duration::minutes(20));
    assert_eq!(401, app.get_me(&access).await.status().as_u16());

    let response = reqwest::Client::new()
        .post(&format!("{}/users/logout", app.address))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(200, response.status().as_u16());
    assert!(app.sessions.is_empty().await);

    let replay = app
        .post_json("/users/token/refresh", &json!({"refresh_token": refresh}))
        .await;
    assert_eq!(401, replay.status().as_u16());
}

#[tokio::test]
async fn logout_revokes_refresh_cookie_when_access_token_is_unusable() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;
    let refresh = token(&registered, "refresh_token");

    let response = reqwest::Client::new()
        .post(&format!("{}/users/logout", app.address))
        .bearer_auth("not-a-token")
        .header("Cookie", format!("refresh_token={}", refresh))
        .send()
        .await
        .unwrap();
    assert_eq!(200, response.status().as_u16());
    assert!(app.sessions.is_empty().await);

    let replay = app
        .post_json("/users/token/refresh", &json!({"refresh_token": refresh}))
        .await;
    assert_eq!(401, replay.status().as_u16());
}

// --- Profile ---

#[tokio::test]
async fn update_profile_changes_username_and_resets_verification() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;
    let access = token(&registered, "access_token");

    let response = app
        .send_authed(
            reqwest::Method::PATCH,
            "/users",
            &access,
            Some(&json!({"username": "johnny", "email": "Johnny@Example.com"})),
        )
        .await;
    assert_eq!(200, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["username"], "johnny");
    assert_eq!(body["email"], "johnny@example.com");
    assert_eq!(body["email_verified"], false);
}

#[tokio::test]
async fn update_profile_rejects_bad_input() {
    let app = spawn_app();
    app.register("janedoe", "jane@example.com").await;
    let registered = app.register("johndoe", "john@example.com").await;
    let access = token(&registered, "access_token");

    let cases = vec![
        (json!({}), 400, "empty patch"),
        (json!({"email": "notanemail"}), 400, "invalid email"),
        (json!({"username": "jo"}), 400, "short username"),
        (json!({"email": "jane@example.com"}), 409, "email taken"),
    ];
    for (body, status, reason) in cases {
        let response = app
            .send_authed(reqwest::Method::PATCH, "/users", &access, Some(&body))
            .await;
        assert_eq!(status, response.status().as_u16(), "Should reject: {}", reason);
    }
}

#[tokio::test]
async fn update_profile_requires_session() {
    let app = spawn_app();

    let response = reqwest::Client::new()
        .patch(&format!("{}/users", app.address))
        .json(&json!({"username": "johnny"}))
        .send()
        .await
        .unwrap();
    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn get_user_returns_own_account_only() {
    let app = spawn_app();
    let jane = app.register("janedoe", "jane@example.com").await;
    let john = app.register("johndoe", "john@example.com").await;
    let access = token(&john, "access_token");

    let own_id = john["user"]["id"].as_i64().unwrap();
    let own = app
        .send_authed(reqwest::Method::GET, &format!("/users/{}", own_id), &access, None)
        .await;
    assert_eq!(200, own.status().as_u16());
    let body: Value = own.json().await.unwrap();
    assert_eq!(body["username"], "johndoe");
    assert!(body.get("password_hash").is_none());

    let other_id = jane["user"]["id"].as_i64().unwrap();
    let other = app
        .send_authed(reqwest::Method::GET, &format!("/users/{}", other_id), &access, None)
        .await;
    assert_eq!(403, other.status().as_u16());
    let body: Value = other.json().await.unwrap();
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn delete_user_closes_own_account_and_session() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;
    let access = token(&registered, "access_token");
    let id = registered["user"]["id"].as_i64().unwrap();

    let response = app
        .send_authed(reqwest::Method::DELETE, &format!("/users/{}", id), &access, None)
        .await;
    assert_eq!(200, response.status().as_u16());
    assert!(set_cookies(&response).iter().all(|c| c.contains("Max-Age=0")));

    assert!(app.sessions.is_empty().await);
    assert_eq!(401, app.get_me(&access).await.status().as_u16());
    assert!(!app.users.get(id).await.unwrap().active);
}

#[tokio::test]
async fn delete_user_refuses_other_accounts() {
    let app = spawn_app();
    let jane = app.register("janedoe", "jane@example.com").await;
    let john = app.register("johndoe", "john@example.com").await;
    let jane_id = jane["user"]["id"].as_i64().unwrap();

    let response = app
        .send_authed(
            reqwest::Method::DELETE,
            &format!("/users/{}", jane_id),
            &token(&john, "access_token"),
            None,
        )
        .await;
    assert_eq!(403, response.status().as_u16());
    assert!(app.users.get(jane_id).await.unwrap().active);
}

// --- Email verification ---

#[tokio::test]
async fn email_verification_flow() {
    let app = spawn_app();
    let registered = app.register("johndoe", "john@example.com").await;
    let id = registered["user"]["id"].as_i64().unwrap();

    let response = app
        .post_json("/users/email/verify/send", &json!({"email": "John@Example.com"}))
        .await;
    assert_eq!(200, response.status().as_u16());

    let sent = app.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "john@example.com");
    assert!(sent[0].html.contains("http://shop.test/users/email/verify?token="));

    let raw = app.email.last_token();
    let verified = app
        .post_json("/users/email/verify", &json!({"token": raw}))
        .await;
    assert_eq!(200, verified.status().as_u16());
    assert!(app.users.get(id).await.unwrap().email_verified);

    let reused = app
        .post_json("/users/email/verify", &json!({"token": raw}))
        .await;
    assert_eq!(400, reused.status().as_u16());

    // Verified accounts get no further mail.
    app.post_json("/users/email/verify/send", &json!({"email": "john@example.com"}))
        .await;
    assert_eq!(app.email.sent().len(), 1);
}

#[tokio::test]
async fn verification_send_does_not_reveal_unknown_email() {
    let app = spawn_app();

    let response = app
        .post_json("/users/email/verify/send", &json!({"email": "nobody@example.com"}))
        .await;
    assert_eq!(200, response.status().as_u16());
    assert!(app.email.sent().is_empty());
}

#[tokio::test]
async fn expired_verification_token_is_rejected() {
    let app = spawn_app();
    app.register("johndoe", "john@example.com").await;
    app.post_json("/users/email/verify/send", &json!({"email": "john@example.com"}))
        .await;
    let raw = app.email.last_token();

    app.clock.advance(Duration::hours(25));
    let response = app
        .post_json("/users/email/verify", &json!({"token": raw}))
        .await;
    assert_eq!(400, response.status().as_u16());
}

// --- Password reset ---

#[tokio::test]
async fn password_reset_flow() {
    let app = spawn_app();
    app.register("johndoe", "john@example.com").await;

    let response = app
        .post_json("/users/password/reset/send", &json!({"email": "john@example.com"}))
        .await;
    assert_eq!(200, response.status().as_u16());
    let raw = app.email.last_token();

    let weak = app
        .post_json("/users/password/reset", &json!({"token": raw, "password": "short"}))
        .await;
    assert_eq!(400, weak.status().as_u16());

    let reset = app
        .post_json(
            "/users/password/reset",
            &json!({"token": raw, "password": "ResetPass789"}),
        )
        .await;
    assert_eq!(200, reset.status().as_u16());

    let replay = app
        .post_json(
            "/users/password/reset",
            &json!({"token": raw, "password": "AnotherPass789"}),
        )
        .await;
    assert_eq!(400, replay.status().as_u16());

    let old = app
        .post_json(
            "/users/login",
            &json!({"email": "john@example.com", "password": "SecurePass123"}),
        )
        .await;
    assert_eq!(401, old.status().as_u16());

    let new = app
        .post_json(
            "/users/login",
            &json!({"email": "john@example.com", "password": "ResetPass789"}),
        )
        .await;
    assert_eq!(200, new.status().as_u16());
}

#[tokio::test]
async fn verification_token_cannot_reset_password() {
    let app = spawn_app();
    app.register("johndoe", "john@example.com").await;
    app.post_json("/users/email/verify/send", &json!({"email": "john@example.com"}))
        .await;
    let raw = app.email.last_token();

    let response = app
        .post_json(
            "/users/password/reset",
            &json!({"token": raw, "password": "ResetPass789"}),
        )
        .await;
    assert_eq!(400, response.status().as_u16());
}
