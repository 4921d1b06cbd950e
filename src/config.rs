use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

const DEFAULT_SHIPPING_FLAT_RATE: f64 = 10.0;
const DEFAULT_FREE_SHIPPING_THRESHOLD: f64 = 50.0;
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_MAX_PAYMENT_ATTEMPTS: u32 = 3;
const DEFAULT_JWT_EXPIRATION_SECS: u64 = 3600;

/// Payment gateway connection settings. The gateway itself is an external
/// collaborator; only its endpoint, key pair and callback signature secret
/// live here.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub key_id: String,
    /// Shared secret used both for outbound auth and for verifying the
    /// HMAC-SHA256 signature on inbound payment callbacks.
    #[serde(default)]
    pub key_secret: String,
    #[serde(default = "default_max_payment_attempts")]
    pub max_payment_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            key_id: String::new(),
            key_secret: String::new(),
            max_payment_attempts: default_max_payment_attempts(),
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret for access tokens (minimum 32 characters)
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Access token lifetime in seconds
    #[serde(default = "default_jwt_expiration_secs")]
    pub jwt_expiration_secs: u64,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Create missing tables on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Allow permissive CORS (development only unless explicitly set)
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool sizing
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Flat shipping charge applied below the free-shipping threshold
    #[serde(default = "default_shipping_flat_rate")]
    pub shipping_flat_rate: f64,
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: f64,

    /// ISO currency code used for orders and gateway calls
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Wallet credit granted to a referred customer at verification time
    #[serde(default)]
    pub referral_signup_bonus: f64,
    /// Wallet credit granted to the referrer at verification time
    #[serde(default)]
    pub referral_reward: f64,

    /// Customers registering with this email get back-office access
    #[serde(default)]
    pub bootstrap_admin_email: Option<String>,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling.
    pub fn new(database_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            jwt_secret: jwt_secret.into(),
            jwt_expiration_secs: default_jwt_expiration_secs(),
            host: default_host(),
            port: default_port(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            cors_allow_any_origin: true,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            shipping_flat_rate: DEFAULT_SHIPPING_FLAT_RATE,
            free_shipping_threshold: DEFAULT_FREE_SHIPPING_THRESHOLD,
            currency: DEFAULT_CURRENCY.to_string(),
            referral_signup_bonus: 0.0,
            referral_reward: 0.0,
            bootstrap_admin_email: None,
            gateway: GatewayConfig::default(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn shipping_flat_rate(&self) -> Decimal {
        Decimal::from_f64_retain(self.shipping_flat_rate).unwrap_or(Decimal::ZERO)
    }

    pub fn free_shipping_threshold(&self) -> Decimal {
        Decimal::from_f64_retain(self.free_shipping_threshold).unwrap_or(Decimal::ZERO)
    }

    pub fn referral_signup_bonus(&self) -> Decimal {
        Decimal::from_f64_retain(self.referral_signup_bonus).unwrap_or(Decimal::ZERO)
    }

    pub fn referral_reward(&self) -> Decimal {
        Decimal::from_f64_retain(self.referral_reward).unwrap_or(Decimal::ZERO)
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__`-prefixed environment variables (highest precedence).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .add_source(File::from(Path::new(CONFIG_DIR).join("default")).required(false))
        .add_source(File::from(Path::new(CONFIG_DIR).join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    // Plain DATABASE_URL wins over file configuration for container deploys.
    if let Ok(url) = env::var("DATABASE_URL") {
        builder = builder.set_override("database_url", url)?;
    }

    let cfg: AppConfig = builder.build()?.try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}

/// Initializes the global tracing subscriber. Safe to call once at startup.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_shipping_flat_rate() -> f64 {
    DEFAULT_SHIPPING_FLAT_RATE
}

fn default_free_shipping_threshold() -> f64 {
    DEFAULT_FREE_SHIPPING_THRESHOLD
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_max_payment_attempts() -> u32 {
    DEFAULT_MAX_PAYMENT_ATTEMPTS
}

fn default_gateway_base_url() -> String {
    "https://api.gateway.example".to_string()
}

fn default_jwt_expiration_secs() -> u64 {
    DEFAULT_JWT_EXPIRATION_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_constructor_defaults_are_sane() {
        let cfg = AppConfig::new("sqlite::memory:", "a_secret_that_is_at_least_32_chars_long");
        assert!(cfg.is_development());
        assert_eq!(cfg.shipping_flat_rate(), dec!(10));
        assert_eq!(cfg.free_shipping_threshold(), dec!(50));
        assert_eq!(cfg.gateway.max_payment_attempts, 3);
    }

    #[test]
    fn short_jwt_secret_fails_validation() {
        let cfg = AppConfig::new("sqlite::memory:", "short");
        assert!(cfg.validate().is_err());
    }
}
