use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";
const DEV_DEFAULT_ADMIN_PASSWORD: &str = "arbor-dev-admin";
const DEV_PLACEHOLDER_STRIPE_KEY: &str = "sk_test_dev_placeholder";
const DEV_PLACEHOLDER_STRIPE_WEBHOOK: &str = "whsec_dev_placeholder";
const DEV_PLACEHOLDER_SHIPPO_TOKEN: &str = "shippo_test_dev_placeholder";
const DEV_PLACEHOLDER_EMAIL_KEY: &str = "re_dev_placeholder";

/// Payment gateway (Stripe) configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentsConfig {
    /// Secret API key used for checkout-session creation
    #[validate(length(min = 8))]
    pub secret_key: String,

    /// Shared secret for verifying inbound webhook signatures
    #[validate(length(min = 8))]
    pub webhook_secret: String,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    /// Gateway API base URL (overridable for tests)
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,

    /// ISO currency code used for checkout sessions
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Outbound request timeout (seconds)
    #[serde(default = "default_adapter_timeout_secs")]
    pub timeout_secs: u64,
}

/// Label provider (Shippo) configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShippingConfig {
    /// Provider API token
    #[validate(length(min = 8))]
    pub api_token: String,

    /// Carrier whose cheapest rate is preferred when purchasing labels
    #[serde(default = "default_preferred_carrier")]
    #[validate(custom = "validate_carrier")]
    pub preferred_carrier: String,

    /// Provider API base URL (overridable for tests)
    #[serde(default = "default_shippo_api_base")]
    pub api_base: String,

    /// Default parcel dimensions for inbound repair shipments (inches / ounces)
    #[serde(default = "default_parcel_length_in")]
    pub parcel_length_in: f64,
    #[serde(default = "default_parcel_width_in")]
    pub parcel_width_in: f64,
    #[serde(default = "default_parcel_height_in")]
    pub parcel_height_in: f64,
    #[serde(default = "default_parcel_weight_oz")]
    pub parcel_weight_oz: f64,

    /// Outbound request timeout (seconds)
    #[serde(default = "default_adapter_timeout_secs")]
    pub timeout_secs: u64,
}

/// Transactional email (Resend) configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    /// Provider API key
    #[validate(length(min = 8))]
    pub api_key: String,

    /// From address for all outbound mail
    #[validate(email)]
    pub from_address: String,

    /// Provider API base URL (overridable for tests)
    #[serde(default = "default_email_api_base")]
    pub api_base: String,

    /// Outbound request timeout (seconds)
    #[serde(default = "default_email_timeout_secs")]
    pub timeout_secs: u64,
}

/// Shop identity and origin address used for quotes, emails, and labels
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShopConfig {
    #[serde(default = "default_shop_name")]
    #[validate(length(min = 1))]
    pub name: String,

    /// Destination for admin notification emails
    #[validate(email)]
    pub admin_email: String,

    /// Public site base URL used in payment redirect and email links
    #[validate(custom = "validate_base_url")]
    pub public_base_url: String,

    /// Business origin address, required before labels can be purchased
    #[validate(length(min = 1))]
    pub origin_street: String,
    #[validate(length(min = 1))]
    pub origin_city: String,
    #[validate(length(min = 1))]
    pub origin_state: String,
    #[validate(length(min = 1))]
    pub origin_zip: String,
    #[serde(default = "default_origin_country")]
    pub origin_country: String,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key (minimum 64 characters)
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Admin session token lifetime in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: u64,

    /// Admin login name
    #[validate(length(min = 1))]
    pub admin_username: String,

    /// Admin password as a PHC (argon2) hash string; required outside development
    #[serde(default)]
    pub admin_password_hash: Option<String>,

    /// Plaintext admin password, accepted in development only
    #[serde(default)]
    pub admin_password: Option<String>,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[validate]
    pub payments: PaymentsConfig,

    #[validate]
    pub shipping: ShippingConfig,

    #[validate]
    pub email: EmailConfig,

    #[validate]
    pub shop: ShopConfig,
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Constructs a configuration with development defaults, for tests
    /// and embedded tooling.
    pub fn for_development(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            jwt_secret: DEV_DEFAULT_JWT_SECRET.to_string(),
            jwt_expiration: default_jwt_expiration(),
            admin_username: "admin".to_string(),
            admin_password_hash: None,
            admin_password: Some(DEV_DEFAULT_ADMIN_PASSWORD.to_string()),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            payments: PaymentsConfig {
                secret_key: DEV_PLACEHOLDER_STRIPE_KEY.to_string(),
                webhook_secret: DEV_PLACEHOLDER_STRIPE_WEBHOOK.to_string(),
                webhook_tolerance_secs: default_webhook_tolerance_secs(),
                api_base: default_stripe_api_base(),
                currency: default_currency(),
                timeout_secs: default_adapter_timeout_secs(),
            },
            shipping: ShippingConfig {
                api_token: DEV_PLACEHOLDER_SHIPPO_TOKEN.to_string(),
                preferred_carrier: default_preferred_carrier(),
                api_base: default_shippo_api_base(),
                parcel_length_in: default_parcel_length_in(),
                parcel_width_in: default_parcel_width_in(),
                parcel_height_in: default_parcel_height_in(),
                parcel_weight_oz: default_parcel_weight_oz(),
                timeout_secs: default_adapter_timeout_secs(),
            },
            email: EmailConfig {
                api_key: DEV_PLACEHOLDER_EMAIL_KEY.to_string(),
                from_address: "repairs@arborrepair.test".to_string(),
                api_base: default_email_api_base(),
                timeout_secs: default_email_timeout_secs(),
            },
            shop: ShopConfig {
                name: default_shop_name(),
                admin_email: "owner@arborrepair.test".to_string(),
                public_base_url: "http://localhost:3000".to_string(),
                origin_street: "214 Juniper Ave".to_string(),
                origin_city: "Portland".to_string(),
                origin_state: "OR".to_string(),
                origin_zip: "97201".to_string(),
                origin_country: default_origin_country(),
            },
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Cross-field constraints that cannot be expressed with derive
    /// attributes. Development placeholders for credentials are rejected
    /// outside the development environment so misconfiguration fails at
    /// startup, not on first use.
    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() {
            if self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
                let mut err = ValidationError::new("jwt_secret_default_dev");
                err.message = Some(
                    "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value.".into(),
                );
                errors.add("jwt_secret", err);
            }
            for (field, value, placeholder) in [
                (
                    "payments.secret_key",
                    self.payments.secret_key.as_str(),
                    DEV_PLACEHOLDER_STRIPE_KEY,
                ),
                (
                    "payments.webhook_secret",
                    self.payments.webhook_secret.as_str(),
                    DEV_PLACEHOLDER_STRIPE_WEBHOOK,
                ),
                (
                    "shipping.api_token",
                    self.shipping.api_token.as_str(),
                    DEV_PLACEHOLDER_SHIPPO_TOKEN,
                ),
                (
                    "email.api_key",
                    self.email.api_key.as_str(),
                    DEV_PLACEHOLDER_EMAIL_KEY,
                ),
            ] {
                if value.trim() == placeholder {
                    let mut err = ValidationError::new("dev_placeholder_credential");
                    err.message = Some(
                        format!(
                            "{} still holds its development placeholder; set the real credential",
                            field
                        )
                        .into(),
                    );
                    errors.add("credentials", err);
                }
            }
            if self.admin_password_hash.is_none() {
                let mut err = ValidationError::new("admin_password_hash_required");
                err.message = Some(
                    "Plaintext admin passwords are accepted in development only. Set APP__ADMIN_PASSWORD_HASH to an argon2 PHC string.".into(),
                );
                errors.add("admin_password_hash", err);
            }
        }

        if self.admin_password_hash.is_none() && self.admin_password.is_none() {
            let mut err = ValidationError::new("admin_credentials_required");
            err.message =
                Some("Either admin_password_hash or admin_password must be configured".into());
            errors.add("admin_password_hash", err);
        }

        if let Some(hash) = &self.admin_password_hash {
            if argon2::password_hash::PasswordHash::new(hash).is_err() {
                let mut err = ValidationError::new("admin_password_hash_invalid");
                err.message =
                    Some("admin_password_hash is not a parseable argon2 PHC string".into());
                errors.add("admin_password_hash", err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_jwt_expiration() -> u64 {
    8 * 60 * 60
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_shippo_api_base() -> String {
    "https://api.goshippo.com".to_string()
}

fn default_email_api_base() -> String {
    "https://api.resend.com".to_string()
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_adapter_timeout_secs() -> u64 {
    30
}

fn default_email_timeout_secs() -> u64 {
    30
}

fn default_preferred_carrier() -> String {
    "usps".to_string()
}

fn default_parcel_length_in() -> f64 {
    12.0
}
fn default_parcel_width_in() -> f64 {
    9.0
}
fn default_parcel_height_in() -> f64 {
    4.0
}
fn default_parcel_weight_oz() -> f64 {
    24.0
}

fn default_shop_name() -> String {
    "Arbor Device Repair".to_string()
}

fn default_origin_country() -> String {
    "US".to_string()
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 64 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must be at least 64 characters for adequate security".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_carrier(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "usps" | "ups" | "fedex" | "dhl_express" => Ok(()),
        _ => {
            let mut err = ValidationError::new("preferred_carrier");
            err.message = Some("Must be one of: usps, ups, fedex, dhl_express".into());
            Err(err)
        }
    }
}

fn validate_base_url(value: &str) -> Result<(), ValidationError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("public_base_url");
        err.message = Some("public_base_url must start with http:// or https://".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("arbor_repair_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://arbor.db?mode=rwc")?
        .set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?
        .set_default("admin_username", "admin")?
        .set_default("admin_password", DEV_DEFAULT_ADMIN_PASSWORD)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("payments.secret_key", DEV_PLACEHOLDER_STRIPE_KEY)?
        .set_default("payments.webhook_secret", DEV_PLACEHOLDER_STRIPE_WEBHOOK)?
        .set_default("shipping.api_token", DEV_PLACEHOLDER_SHIPPO_TOKEN)?
        .set_default("email.api_key", DEV_PLACEHOLDER_EMAIL_KEY)?
        .set_default("email.from_address", "repairs@arborrepair.test")?
        .set_default("shop.admin_email", "owner@arborrepair.test")?
        .set_default("shop.public_base_url", "http://localhost:3000")?
        .set_default("shop.origin_street", "214 Juniper Ave")?
        .set_default("shop.origin_city", "Portland")?
        .set_default("shop.origin_state", "OR")?
        .set_default("shop.origin_zip", "97201")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
