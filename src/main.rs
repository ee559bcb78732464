use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use storefront::auth::{Clock, SessionManager, SystemClock};
use storefront::configuration::get_configuration;
use storefront::email_client::EmailClient;
use storefront::startup::{build_session_store, run, Services};
use storefront::telemetry::init_telemetry;
use storefront::users::{PgUserStore, PgUserTokenStore};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run migrations: {}", e);
            std::io::Error::new(std::io::ErrorKind::Other, "Migration error")
        })?;
    tracing::info!("Database ready");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = build_session_store(&configuration.session, clock.clone())
        .await
        .map_err(|e| {
            tracing::error!("Failed to initialise session store: {}", e);
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Session store error")
        })?;
    let sessions = Arc::new(SessionManager::new(configuration.jwt.clone(), store, clock));
    let email = EmailClient::from_settings(&configuration.email_client).map_err(|e| {
        tracing::error!("Failed to build email client: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Email client error")
    })?;
    let services = Services {
        users: Arc::new(PgUserStore::new(pool.clone())),
        tokens: Arc::new(PgUserTokenStore::new(pool)),
        sessions,
        email: Arc::new(email),
    };

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(
        listener,
        services,
        configuration.cookies.clone(),
        configuration.password.clone(),
        configuration.application.base_url.clone(),
    )?;

    server.await
}
