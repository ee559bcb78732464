use actix_web::dev::Server;
use actix_web::{guard, middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Clock, MemorySessionStore, RedisSessionStore, SessionManager, SessionStore};
use crate::configuration::{CookieSettings, PasswordSettings, SessionBackend, SessionSettings};
use crate::email_client::EmailSender;
use crate::error::{AppError, ConfigError};
use crate::logger::LoggerMiddleware;
use crate::middleware::SessionRequired;
use crate::routes::{
    change_password, create_user, current_user, delete_user, get_user, health_check, login,
    logout, refresh, reset_password, send_password_reset_email, send_verification_email,
    update_profile, verify_email, ApplicationBaseUrl,
};
use crate::users::{UserStore, UserTokenStore};

const MEMORY_PURGE_EVERY: Duration = Duration::from_secs(300);

/// Stores and clients shared by every worker.
pub struct Services {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn UserTokenStore>,
    pub sessions: Arc<SessionManager>,
    pub email: Arc<dyn EmailSender>,
}

/// Select and connect the configured session backend.
pub async fn build_session_store(
    settings: &SessionSettings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SessionStore>, AppError> {
    match settings.backend {
        SessionBackend::Memory => {
            tracing::info!("Using in-memory session store");
            let store = Arc::new(MemorySessionStore::new(clock));
            // Stops by itself once the store is dropped.
            let _ = store.spawn_purge_task(MEMORY_PURGE_EVERY);
            Ok(store)
        }
        SessionBackend::Redis => {
            let url = settings
                .redis_url
                .as_deref()
                .ok_or_else(|| ConfigError::MissingRequired("session.redis_url".to_string()))?;
            tracing::info!("Connecting to Redis session store");
            let store = RedisSessionStore::connect(url, clock).await?;
            Ok(Arc::new(store))
        }
    }
}

pub fn run(
    listener: TcpListener,
    services: Services,
    cookies: CookieSettings,
    password: PasswordSettings,
    base_url: String,
) -> Result<Server, std::io::Error> {
    let sessions = services.sessions;
    let users = web::Data::from(services.users);
    let tokens = web::Data::from(services.tokens);
    let email = web::Data::from(services.email);
    let sessions_data = web::Data::from(sessions.clone());
    let cookies = web::Data::new(cookies);
    let password = web::Data::new(password);
    let base_url = web::Data::new(ApplicationBaseUrl(base_url));

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(users.clone())
            .app_data(tokens.clone())
            .app_data(email.clone())
            .app_data(sessions_data.clone())
            .app_data(cookies.clone())
            .app_data(password.clone())
            .app_data(base_url.clone())

            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/users")
                    // PATCH needs a session, POST (registration) does not.
                    .service(
                        web::resource("")
                            .guard(guard::Patch())
                            .wrap(SessionRequired::new(sessions.clone()))
                            .route(web::patch().to(update_profile)),
                    )
                    .route("", web::post().to(create_user))
                    .route("/login", web::post().to(login))
                    .route("/logout", web::post().to(logout))
                    .route("/token/refresh", web::post().to(refresh))
                    .route("/email/verify", web::post().to(verify_email))
                    .route("/email/verify/send", web::post().to(send_verification_email))
                    .route("/password/reset", web::post().to(reset_password))
                    .route("/password/reset/send", web::post().to(send_password_reset_email))
                    .service(
                        web::resource("/me")
                            .wrap(SessionRequired::new(sessions.clone()))
                            .route(web::get().to(current_user)),
                    )
                    .service(
                        web::resource("/password")
                            .wrap(SessionRequired::new(sessions.clone()))
                            .route(web::put().to(change_password)),
                    )
                    .service(
                        web::resource("/{user_id:\\d+}")
                            .wrap(SessionRequired::new(sessions.clone()))
                            .route(web::get().to(get_user))
                            .route(web::delete().to(delete_user)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
