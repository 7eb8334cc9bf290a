//! Provider-agnostic payment gateway.
//!
//! [`PaymentGatewayFacade`] dispatches by provider key to one adapter per
//! provider. Adapters own the wire format and the signatures; everything
//! above them works with [`PaymentData`], [`InitializedPayment`] and
//! [`VerifiedPayment`].

pub mod ledger;
pub mod opay;
pub mod palmpay;
pub mod paystack;
pub mod reconciliation;
pub mod signing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::PaymentsConfig;
use crate::entities::commerce::order::PaymentMethod;
use crate::errors::ServiceError;
use crate::tracing::timed;

/// Online payment providers with an adapter
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PaymentProvider {
    Paystack,
    Palmpay,
    Opay,
}

impl PaymentProvider {
    pub fn from_method(method: PaymentMethod) -> Option<Self> {
        match method {
            PaymentMethod::Paystack => Some(Self::Paystack),
            PaymentMethod::Palmpay => Some(Self::Palmpay),
            PaymentMethod::Opay => Some(Self::Opay),
            PaymentMethod::CashOnDelivery => None,
        }
    }

    pub fn method(self) -> PaymentMethod {
        match self {
            Self::Paystack => PaymentMethod::Paystack,
            Self::Palmpay => PaymentMethod::Palmpay,
            Self::Opay => PaymentMethod::Opay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Unsupported payment provider: {0}")]
    UnsupportedProvider(String),
    #[error("{0} is not configured")]
    NotConfigured(PaymentProvider),
    #[error("{0} did not respond in time")]
    Timeout(PaymentProvider),
    #[error("{provider} transport error: {message}")]
    Transport {
        provider: PaymentProvider,
        message: String,
    },
    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: PaymentProvider,
        status: u16,
        body: String,
    },
    #[error("{provider} rejected the request: {message}")]
    Rejected {
        provider: PaymentProvider,
        message: String,
    },
    #[error("malformed {provider} response: {message}")]
    Malformed {
        provider: PaymentProvider,
        message: String,
    },
    #[error("invalid payment request: {0}")]
    InvalidRequest(String),
    #[error("invalid signing key")]
    Signing,
}

impl GatewayError {
    /// Whether the same call may be repeated. Only meaningful for idempotent
    /// calls such as verify.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout(_) | GatewayError::Transport { .. } => true,
            GatewayError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(provider: PaymentProvider, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(provider)
        } else if err.is_decode() {
            GatewayError::Malformed {
                provider,
                message: err.to_string(),
            }
        } else {
            GatewayError::Transport {
                provider,
                message: err.to_string(),
            }
        }
    }
}

impl From<signing::InvalidKey> for GatewayError {
    fn from(_: signing::InvalidKey) -> Self {
        GatewayError::Signing
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::UnsupportedProvider(p) => ServiceError::UnsupportedProvider(p),
            GatewayError::InvalidRequest(msg) => ServiceError::ValidationError(msg),
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

/// What an adapter needs to open a payment session
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentData {
    pub reference: String,
    /// Major currency units
    pub amount: Decimal,
    pub currency: String,
    pub email: Option<String>,
    pub user_id: Uuid,
    pub order_ids: Vec<Uuid>,
    pub callback_url: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitializedPayment {
    pub reference: String,
    /// Where the shopper completes the payment
    pub checkout_url: Option<String>,
    pub access_code: Option<String>,
    pub provider_reference: Option<String>,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPaymentStatus {
    Success,
    Failed,
    Pending,
}

/// A provider's authenticated statement about one payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPayment {
    pub provider: PaymentProvider,
    pub reference: String,
    pub status: ProviderPaymentStatus,
    pub amount_minor: i64,
    pub currency: Option<String>,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Provider's own wording, kept as the failure reason
    pub message: Option<String>,
}

impl VerifiedPayment {
    pub fn amount_major(&self) -> Decimal {
        from_minor_units(self.amount_minor)
    }
}

/// Normalized `{success, data, error, provider}` envelope returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GatewayResponse {
    pub success: bool,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GatewayResponse {
    pub fn ok<T: Serialize>(provider: impl Into<String>, data: &T) -> Self {
        let provider = provider.into();
        match serde_json::to_value(data) {
            Ok(value) => Self {
                success: true,
                provider,
                data: Some(value),
                error: None,
            },
            Err(e) => Self::failed(provider, e.to_string()),
        }
    }

    pub fn failed(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider: provider.into(),
            data: None,
            error: Some(error.into()),
        }
    }
}

/// One provider integration
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Header carrying the webhook signature
    fn signature_header(&self) -> &'static str;

    /// Header carrying the signing timestamp, for providers that use one
    fn timestamp_header(&self) -> Option<&'static str> {
        None
    }

    async fn initialize(&self, data: &PaymentData) -> Result<InitializedPayment, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, GatewayError>;

    /// Recomputes the signature over the raw body and compares it.
    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        timestamp: Option<&str>,
    ) -> bool;

    /// Reads an already verified webhook body.
    fn parse_webhook(&self, payload: &[u8]) -> Result<VerifiedPayment, GatewayError>;
}

/// Reads a provider JSON body, turning non-2xx statuses into `Http` errors.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    provider: PaymentProvider,
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::from_reqwest(provider, e))?;

    if !status.is_success() {
        return Err(GatewayError::Http {
            provider,
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::Malformed {
        provider,
        message: e.to_string(),
    })
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Major units to integer minor units (x100), rounded half away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| GatewayError::InvalidRequest(format!("amount {} out of range", amount)))
}

pub fn from_minor_units(amount_minor: i64) -> Decimal {
    Decimal::from(amount_minor) / Decimal::ONE_HUNDRED
}

/// `PAY_{orderId}_{unixMillis}`
pub fn generate_reference(order_id: Uuid, now: DateTime<Utc>) -> String {
    format!("PAY_{}_{}", order_id, now.timestamp_millis())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    pub percentage_rate: Decimal,
    pub cap: Decimal,
    pub fixed_fee: Decimal,
}

const FEE_CAP: Decimal = dec!(200000);

pub fn fee_schedule(method: PaymentMethod) -> FeeSchedule {
    let percentage_rate = match method {
        PaymentMethod::Paystack => dec!(1.5),
        PaymentMethod::Palmpay => dec!(1.4),
        PaymentMethod::Opay => dec!(2.5),
        PaymentMethod::CashOnDelivery => Decimal::ZERO,
    };
    FeeSchedule {
        percentage_rate,
        cap: FEE_CAP,
        fixed_fee: Decimal::ZERO,
    }
}

/// `round(min(amount * rate / 100, cap) + fixed)`; zero for cash on delivery.
pub fn compute_fee(method: PaymentMethod, amount: Decimal) -> Decimal {
    if method == PaymentMethod::CashOnDelivery {
        return Decimal::ZERO;
    }
    let schedule = fee_schedule(method);
    let variable = (amount.max(Decimal::ZERO) * schedule.percentage_rate / Decimal::ONE_HUNDRED)
        .min(schedule.cap);
    (variable + schedule.fixed_fee).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Parses a provider key as used in URLs and requests. `cod` and
/// `cash_on_delivery` are accepted for fee estimation.
pub fn parse_payment_method(key: &str) -> Result<PaymentMethod, GatewayError> {
    PaymentMethod::from_str(key.trim())
        .map_err(|_| GatewayError::UnsupportedProvider(key.to_string()))
}

/// Dispatches calls to the adapter registered for each provider.
#[derive(Clone)]
pub struct PaymentGatewayFacade {
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
    verify_max_attempts: u32,
    verify_initial_backoff: Duration,
}

impl PaymentGatewayFacade {
    pub fn new(verify_max_attempts: u32, verify_initial_backoff: Duration) -> Self {
        Self {
            gateways: HashMap::new(),
            verify_max_attempts: verify_max_attempts.max(1),
            verify_initial_backoff,
        }
    }

    /// Builds the three HTTP adapters from configuration. Providers without
    /// credentials are skipped and reported as not configured when used.
    pub fn from_config(config: &PaymentsConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("settlement-api/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        let mut facade = Self::new(
            config.verify_max_attempts,
            Duration::from_millis(config.verify_initial_backoff_ms),
        );
        if config.paystack.is_configured() {
            facade = facade.with_gateway(Arc::new(paystack::PaystackGateway::new(
                client.clone(),
                config.paystack.clone(),
            )));
        }
        if config.palmpay.is_configured() {
            facade = facade.with_gateway(Arc::new(palmpay::PalmPayGateway::new(
                client.clone(),
                config.palmpay.clone(),
            )));
        }
        if config.opay.is_configured() {
            facade = facade.with_gateway(Arc::new(opay::OpayGateway::new(
                client,
                config.opay.clone(),
            )));
        }
        Ok(facade)
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn provider(key: &str) -> Result<PaymentProvider, GatewayError> {
        PaymentProvider::from_str(key.trim())
            .map_err(|_| GatewayError::UnsupportedProvider(key.to_string()))
    }

    pub fn gateway(&self, provider: PaymentProvider) -> Result<&Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .get(&provider)
            .ok_or(GatewayError::NotConfigured(provider))
    }

    pub fn gateway_for_key(&self, key: &str) -> Result<&Arc<dyn PaymentGateway>, GatewayError> {
        self.gateway(Self::provider(key)?)
    }

    /// Sorted provider keys that have an adapter.
    pub fn configured_providers(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.gateways.keys().map(|p| p.to_string()).collect();
        keys.sort();
        keys
    }

    /// Opens a payment session. Never retried: a repeated call could create a
    /// second session at the provider.
    #[instrument(skip(self, data), fields(reference = %data.reference))]
    pub async fn initialize_payment(
        &self,
        provider: PaymentProvider,
        data: &PaymentData,
    ) -> Result<InitializedPayment, GatewayError> {
        let gateway = self.gateway(provider)?;
        let result = timed("payments.initialize", gateway.initialize(data)).await;
        match &result {
            Ok(_) => {
                counter!("settlement.payments.initialized", 1, "provider" => provider.to_string());
                info!(%provider, "payment initialized");
            }
            Err(_) => {
                counter!("settlement.payments.initialize_failures", 1, "provider" => provider.to_string());
            }
        }
        result
    }

    /// Asks the provider about `reference`, retrying transient failures with
    /// exponential backoff.
    #[instrument(skip(self))]
    pub async fn verify_payment(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<VerifiedPayment, GatewayError> {
        let gateway = self.gateway(provider)?;
        let mut backoff = self.verify_initial_backoff;
        let mut attempt = 1;
        loop {
            match timed("payments.verify", gateway.verify(reference)).await {
                Ok(verified) => return Ok(verified),
                Err(e) if e.is_retryable() && attempt < self.verify_max_attempts => {
                    warn!(%provider, attempt, error = %e, "verify failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(%provider, attempt, error = %e, "verify failed");
                    return Err(e);
                }
            }
        }
    }

    /// `initialize` keyed by provider name, in the normalized envelope.
    pub async fn initialize(&self, provider_key: &str, data: &PaymentData) -> GatewayResponse {
        let provider = match Self::provider(provider_key) {
            Ok(p) => p,
            Err(e) => return GatewayResponse::failed(provider_key, e.to_string()),
        };
        match self.initialize_payment(provider, data).await {
            Ok(init) => GatewayResponse::ok(provider.to_string(), &init),
            Err(e) => GatewayResponse::failed(provider.to_string(), e.to_string()),
        }
    }

    /// `verify` keyed by provider name, in the normalized envelope.
    pub async fn verify(&self, provider_key: &str, reference: &str) -> GatewayResponse {
        let provider = match Self::provider(provider_key) {
            Ok(p) => p,
            Err(e) => return GatewayResponse::failed(provider_key, e.to_string()),
        };
        match self.verify_payment(provider, reference).await {
            Ok(verified) => GatewayResponse::ok(provider.to_string(), &verified),
            Err(e) => GatewayResponse::failed(provider.to_string(), e.to_string()),
        }
    }

    /// False for unknown providers and bad signatures alike.
    pub fn verify_webhook_signature(
        &self,
        provider_key: &str,
        payload: &[u8],
        signature: &str,
        timestamp: Option<&str>,
    ) -> bool {
        match self.gateway_for_key(provider_key) {
            Ok(gateway) => gateway.verify_webhook_signature(payload, signature, timestamp),
            Err(_) => false,
        }
    }

    pub fn compute_fee(&self, provider_key: &str, amount: Decimal) -> Result<Decimal, GatewayError> {
        Ok(compute_fee(parse_payment_method(provider_key)?, amount))
    }
}
