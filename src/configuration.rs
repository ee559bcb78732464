use crate::error::ConfigError;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub cookies: CookieSettings,
    #[serde(default)]
    pub password: PasswordSettings,
    pub email_client: EmailClientSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Public origin used to build links in outgoing emails
    pub base_url: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Transactional email delivery API.
#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    #[serde(default = "default_email_timeout")]
    pub timeout_milliseconds: u64,
}

fn default_email_timeout() -> u64 {
    10_000
}

impl EmailClientSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_milliseconds)
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// JWT signing settings. Access and refresh tokens are signed with
/// different secrets so one class can never be replayed as the other.
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    #[serde(default = "default_access_expiry")]
    pub access_token_expiry: i64,   // seconds (900 = 15 minutes)
    #[serde(default = "default_refresh_expiry")]
    pub refresh_token_expiry: i64,  // seconds (604800 = 7 days)
    pub issuer: String,
}

fn default_access_expiry() -> i64 {
    15 * 60
}

fn default_refresh_expiry() -> i64 {
    7 * 24 * 60 * 60
}

/// Upper bound for either token lifetime (one year).
pub const MAX_TOKEN_EXPIRY_SECONDS: i64 = 365 * 24 * 60 * 60;

impl JwtSettings {
    /// Reject settings that would make issued tokens unsafe or unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.access_secret".to_string()));
        }
        if self.refresh_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.refresh_secret".to_string()));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::InvalidValue(
                "jwt.access_secret and jwt.refresh_secret must differ".to_string(),
            ));
        }
        if self.access_token_expiry <= 0 || self.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "jwt token expiry must be positive".to_string(),
            ));
        }
        if self.access_token_expiry > MAX_TOKEN_EXPIRY_SECONDS
            || self.refresh_token_expiry > MAX_TOKEN_EXPIRY_SECONDS
        {
            return Err(ConfigError::InvalidValue(format!(
                "jwt token expiry must not exceed {} seconds",
                MAX_TOKEN_EXPIRY_SECONDS
            )));
        }
        if self.refresh_token_expiry <= self.access_token_expiry {
            return Err(ConfigError::InvalidValue(
                "jwt.refresh_token_expiry must exceed jwt.access_token_expiry".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(serde::Deserialize, Clone, Default)]
pub struct SessionSettings {
    #[serde(default)]
    pub backend: SessionBackend,
    pub redis_url: Option<String>,
}

#[derive(serde::Deserialize, Clone)]
pub struct CookieSettings {
    #[serde(default = "default_secure")]
    pub secure: bool,
    pub domain: Option<String>,
}

fn default_secure() -> bool {
    true
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: default_secure(),
            domain: None,
        }
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct PasswordSettings {
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

/// Load settings from `configuration.{yaml,toml,json}` (optional) and
/// `APP_*` environment variables, e.g. `APP_JWT__ACCESS_SECRET`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    let settings = settings
        .try_deserialize::<Settings>()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    settings.jwt.validate()?;
    if settings.session.backend == SessionBackend::Redis && settings.session.redis_url.is_none() {
        return Err(ConfigError::MissingRequired("session.redis_url".to_string()));
    }

    Ok(settings)
}
