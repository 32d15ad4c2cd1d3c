use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const MIN_JWT_SECRET_BYTES: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    pub otp: OtpSettings,
    pub google: GoogleSettings,
    pub payment: PaymentSettings,
    pub mail: MailSettings,
    pub booking: BookingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Used to build the return URL handed to the payment gateway.
    pub public_base_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `libsql://...` for Turso, anything else is a local file path.
    pub url: String,
    pub auth_token: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "gym.db".to_string(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_days: i64,
    pub password_hash: PasswordHashSettings,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            issuer: "gym-api".to_string(),
            audience: "gym-clients".to_string(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_days: 30,
            password_hash: PasswordHashSettings::default(),
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PasswordHashSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordHashSettings {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OtpSettings {
    pub ttl_secs: i64,
    pub resend_cooldown_secs: i64,
    pub max_attempts: u32,
    pub length: usize,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            resend_cooldown_secs: 60,
            max_attempts: 5,
            length: 6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    pub client_id: String,
    pub tokeninfo_url: String,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            tokeninfo_url: "https://oauth2.googleapis.com/tokeninfo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentSettings {
    pub api_base_url: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub currency: String,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:9090".to_string(),
            api_key: String::new(),
            webhook_secret: String::new(),
            webhook_tolerance_secs: 300,
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailMode {
    Log,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub mode: MailMode,
    pub api_base_url: String,
    pub api_token: String,
    pub sender: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            mode: MailMode::Log,
            api_base_url: String::new(),
            api_token: String::new(),
            sender: "no-reply@gym.local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookingSettings {
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    pub member_cancel_cutoff_hours: i64,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            min_duration_minutes: 30,
            max_duration_minutes: 120,
            member_cancel_cutoff_hours: 2,
        }
    }
}

impl Settings {
    /// Load from `$GYM_CONFIG` (default `config.toml`), then apply environment overrides.
    ///
    /// A missing default file falls back to built-in defaults; an explicitly named file must exist.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("GYM_CONFIG").ok();
        let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

        let mut settings = if explicit.is_none() && !Path::new(path).exists() {
            Settings::default()
        } else {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_string(),
                source,
            })?;
            Self::from_toml_str(&content)?
        };

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        if let Some(v) = var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = var("PAYMENT_WEBHOOK_SECRET") {
            self.payment.webhook_secret = v;
        }
        if let Some(v) = var("PAYMENT_API_KEY") {
            self.payment.api_key = v;
        }
        if let Some(v) = var("GOOGLE_CLIENT_ID") {
            self.google.client_id = v;
        }
        if let Some(v) = var("MAIL_API_TOKEN") {
            self.mail.api_token = v;
        }
        if let Some(v) = var("LIBSQL_URL") {
            self.database.url = v;
        }
        if let Some(v) = var("LIBSQL_AUTH_TOKEN") {
            self.database.auth_token = Some(v);
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            return Err(ConfigError::Invalid(format!(
                "auth.jwt_secret must be at least {MIN_JWT_SECRET_BYTES} bytes"
            )));
        }
        if self.payment.webhook_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "payment.webhook_secret must be set".to_string(),
            ));
        }
        if self.otp.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "otp.max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.otp.length == 0 || self.otp.length > 10 {
            return Err(ConfigError::Invalid(
                "otp.length must be between 1 and 10".to_string(),
            ));
        }
        if self.booking.min_duration_minutes <= 0
            || self.booking.min_duration_minutes > self.booking.max_duration_minutes
        {
            return Err(ConfigError::Invalid(
                "booking duration bounds are inconsistent".to_string(),
            ));
        }
        if self.mail.mode == MailMode::Http && self.mail.api_base_url.is_empty() {
            return Err(ConfigError::Invalid(
                "mail.api_base_url is required when mail.mode = \"http\"".to_string(),
            ));
        }
        Ok(())
    }
}
