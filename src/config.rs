use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::entities::commerce::order::DeliveryMethod;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "NGN";

/// Credentials and endpoint for a single payment provider.
#[derive(Clone, Deserialize, Validate, Default)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Merchant identifier (OPay `MerchantId`, PalmPay merchant number)
    #[serde(default)]
    pub merchant_id: Option<String>,
    /// Application identifier sent by PalmPay
    #[serde(default)]
    pub app_id: Option<String>,
}

impl ProviderCredentials {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.secret_key.trim().is_empty()
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("base_url", &self.base_url)
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .field("merchant_id", &self.merchant_id)
            .field("app_id", &self.app_id)
            .finish()
    }
}

/// Payment provider wiring and frontend redirect targets
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaymentsConfig {
    #[serde(default)]
    pub paystack: ProviderCredentials,
    #[serde(default)]
    pub palmpay: ProviderCredentials,
    #[serde(default)]
    pub opay: ProviderCredentials,

    /// Upper bound for a single provider HTTP call
    #[serde(default = "default_http_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub http_timeout_secs: u64,

    /// Attempts for verify calls (initialize is never retried)
    #[serde(default = "default_verify_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub verify_max_attempts: u32,

    #[serde(default = "default_verify_initial_backoff_ms")]
    pub verify_initial_backoff_ms: u64,

    /// URL the provider redirects the customer back to
    #[serde(default = "default_callback_url")]
    #[validate(url)]
    pub callback_url: String,

    /// Frontend page shown after a confirmed payment (`?slugs=` is appended)
    #[serde(default = "default_completed_url")]
    #[validate(url)]
    pub completed_url: String,

    /// Frontend cart page shown after a failed payment (`?error=` is appended)
    #[serde(default = "default_cart_url")]
    #[validate(url)]
    pub cart_url: String,

    /// Deep links used when the callback carries `platform=mobile`
    #[serde(default)]
    pub mobile_completed_url: Option<String>,
    #[serde(default)]
    pub mobile_cart_url: Option<String>,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            paystack: ProviderCredentials::default(),
            palmpay: ProviderCredentials::default(),
            opay: ProviderCredentials::default(),
            http_timeout_secs: default_http_timeout_secs(),
            verify_max_attempts: default_verify_max_attempts(),
            verify_initial_backoff_ms: default_verify_initial_backoff_ms(),
            callback_url: default_callback_url(),
            completed_url: default_completed_url(),
            cart_url: default_cart_url(),
            mobile_completed_url: None,
            mobile_cart_url: None,
        }
    }
}

impl PaymentsConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn completed_url_for(&self, platform: Option<&str>) -> &str {
        match platform {
            Some(p) if p.eq_ignore_ascii_case("mobile") => self
                .mobile_completed_url
                .as_deref()
                .unwrap_or(&self.completed_url),
            _ => &self.completed_url,
        }
    }

    pub fn cart_url_for(&self, platform: Option<&str>) -> &str {
        match platform {
            Some(p) if p.eq_ignore_ascii_case("mobile") => {
                self.mobile_cart_url.as_deref().unwrap_or(&self.cart_url)
            }
            _ => &self.cart_url,
        }
    }
}

/// Checkout pricing knobs
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PricingConfig {
    /// Tax as a fraction of the subtotal (0.075 for 7.5%)
    #[serde(default)]
    #[validate(custom = "validate_tax_rate")]
    pub tax_rate: Decimal,

    #[serde(default = "default_standard_delivery_fee")]
    pub standard_delivery_fee: Decimal,

    #[serde(default = "default_express_delivery_fee")]
    pub express_delivery_fee: Decimal,

    #[serde(default)]
    pub pickup_delivery_fee: Decimal,

    /// Lifetime of an untouched active cart
    #[serde(default = "default_cart_ttl_hours")]
    #[validate(range(min = 1))]
    pub cart_ttl_hours: i64,
}

impl PricingConfig {
    pub fn delivery_fee_for(&self, method: DeliveryMethod) -> Decimal {
        match method {
            DeliveryMethod::Standard => self.standard_delivery_fee,
            DeliveryMethod::Express => self.express_delivery_fee,
            DeliveryMethod::Pickup => self.pickup_delivery_fee,
        }
    }

    pub fn cart_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cart_ttl_hours)
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::ZERO,
            standard_delivery_fee: default_standard_delivery_fee(),
            express_delivery_fee: default_express_delivery_fee(),
            pickup_delivery_fee: Decimal::ZERO,
            cart_ttl_hours: default_cart_ttl_hours(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
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

    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Whole-request timeout applied by the HTTP stack
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// ISO currency code of every amount handled by the service
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    #[serde(default)]
    #[validate]
    pub pricing: PricingConfig,

    #[serde(default)]
    #[validate]
    pub payments: PaymentsConfig,
}

impl AppConfig {
    /// Builds a configuration populated with defaults; used by tests and tooling.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            currency: default_currency(),
            pricing: PricingConfig::default(),
            payments: PaymentsConfig::default(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|s| s.split(',').any(|o| !o.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() {
            let providers = [
                ("paystack", &self.payments.paystack),
                ("palmpay", &self.payments.palmpay),
                ("opay", &self.payments.opay),
            ];
            if !providers.iter().any(|(_, creds)| creds.is_configured()) {
                let mut err = ValidationError::new("payment_provider_required");
                err.message = Some(
                    "At least one payment provider needs base_url and secret_key outside development"
                        .into(),
                );
                errors.add("payments", err);
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

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
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
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_verify_max_attempts() -> u32 {
    3
}

fn default_verify_initial_backoff_ms() -> u64 {
    250
}

fn default_callback_url() -> String {
    "http://localhost:8080/api/v1/payments/callback".to_string()
}

fn default_completed_url() -> String {
    "http://localhost:3000/orders/completed".to_string()
}

fn default_cart_url() -> String {
    "http://localhost:3000/cart".to_string()
}

fn default_standard_delivery_fee() -> Decimal {
    dec!(1500)
}

fn default_express_delivery_fee() -> Decimal {
    dec!(3000)
}

fn default_cart_ttl_hours() -> i64 {
    72
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_tax_rate(rate: &Decimal) -> Result<(), ValidationError> {
    if rate.is_sign_negative() || *rate > Decimal::ONE {
        let mut err = ValidationError::new("tax_rate");
        err.message = Some("tax_rate must be between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("settlement_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://settlement.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn production_config() -> AppConfig {
        AppConfig::new("sqlite::memory:".into(), "production".into())
    }

    #[test]
    fn defaults_pass_field_validation() {
        let cfg = AppConfig::new("sqlite::memory:".into(), "development".into());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.pricing.tax_rate, Decimal::ZERO);
        assert_eq!(cfg.payments.http_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn tax_rate_outside_unit_interval_is_rejected() {
        let mut cfg = AppConfig::new("sqlite::memory:".into(), "development".into());
        cfg.pricing.tax_rate = dec!(1.5);
        let errors = cfg.validate().unwrap_err();
        assert!(errors.to_string().contains("tax_rate"));
    }

    #[test]
    fn zero_provider_timeout_is_rejected() {
        let mut cfg = AppConfig::new("sqlite::memory:".into(), "development".into());
        cfg.payments.http_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn production_requires_cors_and_a_provider() {
        let cfg = production_config();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        let fields = errors.errors();
        assert!(fields.contains_key("cors_allowed_origins"));
        assert!(fields.contains_key("payments"));
    }

    #[test]
    fn production_with_origins_and_provider_passes() {
        let mut cfg = production_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        cfg.payments.paystack = ProviderCredentials {
            base_url: "https://api.paystack.co".into(),
            public_key: "pk_live".into(),
            secret_key: "sk_live".into(),
            merchant_id: None,
            app_id: None,
        };
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn mobile_platform_falls_back_to_web_urls() {
        let mut payments = PaymentsConfig::default();
        assert_eq!(
            payments.completed_url_for(Some("mobile")),
            payments.completed_url
        );
        payments.mobile_cart_url = Some("shop://cart".into());
        assert_eq!(payments.cart_url_for(Some("MOBILE")), "shop://cart");
        assert_eq!(payments.cart_url_for(None), payments.cart_url);
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let creds = ProviderCredentials {
            secret_key: "sk_very_secret".into(),
            ..Default::default()
        };
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("sk_very_secret"));
    }
}
