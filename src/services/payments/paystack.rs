use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::signing::{constant_time_eq, hmac_sha512_hex};
use super::{
    join_url, read_json, to_minor_units, GatewayError, InitializedPayment, PaymentData,
    PaymentGateway, PaymentProvider, ProviderPaymentStatus, VerifiedPayment,
};
use crate::config::ProviderCredentials;

const PROVIDER: PaymentProvider = PaymentProvider::Paystack;
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: Option<String>,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    id: Option<i64>,
    status: String,
    reference: String,
    amount: i64,
    currency: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    gateway_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    data: Transaction,
}

fn map_status(status: &str) -> ProviderPaymentStatus {
    match status {
        "success" => ProviderPaymentStatus::Success,
        "failed" | "abandoned" | "reversed" => ProviderPaymentStatus::Failed,
        _ => ProviderPaymentStatus::Pending,
    }
}

impl From<Transaction> for VerifiedPayment {
    fn from(tx: Transaction) -> Self {
        VerifiedPayment {
            provider: PROVIDER,
            status: map_status(&tx.status),
            reference: tx.reference,
            amount_minor: tx.amount,
            currency: tx.currency,
            transaction_id: tx.id.map(|id| id.to_string()),
            paid_at: tx.paid_at,
            message: tx.gateway_response,
        }
    }
}

/// Paystack: bearer-authenticated API, amounts in kobo, webhooks signed with
/// HMAC-SHA512 of the raw body under the secret key.
pub struct PaystackGateway {
    client: reqwest::Client,
    credentials: ProviderCredentials,
}

impl PaystackGateway {
    pub fn new(client: reqwest::Client, credentials: ProviderCredentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    pub fn sign_payload(&self, payload: &[u8]) -> Result<String, GatewayError> {
        Ok(hmac_sha512_hex(
            self.credentials.secret_key.as_bytes(),
            payload,
        )?)
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn provider(&self) -> PaymentProvider {
        PROVIDER
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    async fn initialize(&self, data: &PaymentData) -> Result<InitializedPayment, GatewayError> {
        let email = data
            .email
            .as_deref()
            .ok_or_else(|| GatewayError::InvalidRequest("email is required for Paystack".into()))?;
        let amount_minor = to_minor_units(data.amount)?;

        let body = json!({
            "email": email,
            "amount": amount_minor,
            "currency": data.currency,
            "reference": data.reference,
            "callback_url": data.callback_url,
            "metadata": {
                "orderIds": data.order_ids,
                "userId": data.user_id,
                "description": data.description,
            },
        });

        let response = self
            .client
            .post(join_url(&self.credentials.base_url, "transaction/initialize"))
            .bearer_auth(&self.credentials.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e))?;

        let envelope: Envelope<InitializeData> = read_json(PROVIDER, response).await?;
        let init = match envelope {
            Envelope {
                status: true,
                data: Some(init),
                ..
            } => init,
            Envelope { message, .. } => {
                return Err(GatewayError::Rejected {
                    provider: PROVIDER,
                    message: message.unwrap_or_else(|| "initialization refused".into()),
                })
            }
        };

        debug!(reference = %init.reference, "paystack session opened");
        Ok(InitializedPayment {
            reference: data.reference.clone(),
            checkout_url: Some(init.authorization_url),
            access_code: init.access_code,
            provider_reference: Some(init.reference),
            amount_minor,
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, GatewayError> {
        let path = format!("transaction/verify/{}", urlencode(reference));
        let response = self
            .client
            .get(join_url(&self.credentials.base_url, &path))
            .bearer_auth(&self.credentials.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e))?;

        let envelope: Envelope<Transaction> = read_json(PROVIDER, response).await?;
        match envelope {
            Envelope {
                status: true,
                data: Some(tx),
                ..
            } => Ok(tx.into()),
            Envelope { message, .. } => Err(GatewayError::Rejected {
                provider: PROVIDER,
                message: message.unwrap_or_else(|| "verification refused".into()),
            }),
        }
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        _timestamp: Option<&str>,
    ) -> bool {
        match self.sign_payload(payload) {
            Ok(expected) => constant_time_eq(&expected, signature.trim()),
            Err(e) => {
                warn!(error = %e, "paystack webhook signing failed");
                false
            }
        }
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<VerifiedPayment, GatewayError> {
        let event: WebhookEvent =
            serde_json::from_slice(payload).map_err(|e| GatewayError::Malformed {
                provider: PROVIDER,
                message: e.to_string(),
            })?;
        debug!(event = %event.event, "paystack webhook");
        Ok(event.data.into())
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
