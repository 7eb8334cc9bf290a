use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::signing::{canonical_json, constant_time_eq, sha512_hex};
use super::{
    join_url, read_json, to_minor_units, GatewayError, InitializedPayment, PaymentData,
    PaymentGateway, PaymentProvider, ProviderPaymentStatus, VerifiedPayment,
};
use crate::config::ProviderCredentials;

const PROVIDER: PaymentProvider = PaymentProvider::Opay;
const SUCCESS_CODE: &str = "00000";
const COUNTRY: &str = "NG";
pub const SIGNATURE_HEADER: &str = "x-opay-signature";
pub const TIMESTAMP_HEADER: &str = "x-opay-timestamp";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CashierData {
    order_no: Option<String>,
    cashier_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    /// Minor units; sent as a number by the API and as a string in webhooks
    total: Value,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusData {
    reference: String,
    order_no: Option<String>,
    status: String,
    amount: Amount,
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    payload: StatusData,
}

fn map_status(status: &str) -> ProviderPaymentStatus {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESS" => ProviderPaymentStatus::Success,
        "FAIL" | "FAILED" | "CLOSE" | "CLOSED" => ProviderPaymentStatus::Failed,
        _ => ProviderPaymentStatus::Pending,
    }
}

fn minor_amount(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl TryFrom<StatusData> for VerifiedPayment {
    type Error = GatewayError;

    fn try_from(data: StatusData) -> Result<Self, Self::Error> {
        let amount_minor = minor_amount(&data.amount.total).ok_or_else(|| GatewayError::Malformed {
            provider: PROVIDER,
            message: format!("unreadable amount {}", data.amount.total),
        })?;
        let status = map_status(&data.status);
        Ok(VerifiedPayment {
            provider: PROVIDER,
            reference: data.reference,
            status,
            amount_minor,
            currency: data.amount.currency,
            transaction_id: data.order_no,
            paid_at: (status == ProviderPaymentStatus::Success).then(Utc::now),
            message: data.failure_reason,
        })
    }
}

/// OPay: requests and webhooks carry SHA-512 of
/// canonical JSON + timestamp + secret key.
pub struct OpayGateway {
    client: reqwest::Client,
    credentials: ProviderCredentials,
}

impl OpayGateway {
    pub fn new(client: reqwest::Client, credentials: ProviderCredentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    pub fn sign(&self, body: &Value, timestamp: &str) -> String {
        let message = format!(
            "{}{}{}",
            canonical_json(body),
            timestamp,
            self.credentials.secret_key
        );
        sha512_hex(message.as_bytes())
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
    ) -> Result<T, GatewayError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&body, &timestamp);

        let mut request = self
            .client
            .post(join_url(&self.credentials.base_url, path))
            .bearer_auth(&self.credentials.public_key)
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, timestamp)
            .json(&body);
        if let Some(merchant_id) = &self.credentials.merchant_id {
            request = request.header("MerchantId", merchant_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e))?;

        let envelope: Envelope<T> = read_json(PROVIDER, response).await?;
        match envelope {
            Envelope {
                code,
                data: Some(data),
                ..
            } if code == SUCCESS_CODE => Ok(data),
            Envelope { code, message, .. } => Err(GatewayError::Rejected {
                provider: PROVIDER,
                message: format!(
                    "{} ({})",
                    message.unwrap_or_else(|| "request refused".into()),
                    code
                ),
            }),
        }
    }
}

#[async_trait]
impl PaymentGateway for OpayGateway {
    fn provider(&self) -> PaymentProvider {
        PROVIDER
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn timestamp_header(&self) -> Option<&'static str> {
        Some(TIMESTAMP_HEADER)
    }

    async fn initialize(&self, data: &PaymentData) -> Result<InitializedPayment, GatewayError> {
        let amount_minor = to_minor_units(data.amount)?;
        let body = json!({
            "country": COUNTRY,
            "reference": data.reference,
            "amount": {
                "total": amount_minor,
                "currency": data.currency,
            },
            "returnUrl": data.callback_url,
            "callbackUrl": data.callback_url,
            "cancelUrl": data.callback_url,
            "userInfo": {
                "userId": data.user_id,
                "userEmail": data.email,
            },
            "product": {
                "name": data.description,
                "description": data.description,
            },
            "metadata": {
                "orderIds": data.order_ids,
                "userId": data.user_id,
            },
        });

        let cashier: CashierData = self
            .post("api/v1/international/cashier/create", body)
            .await?;
        debug!(order_no = ?cashier.order_no, "opay cashier created");

        Ok(InitializedPayment {
            reference: data.reference.clone(),
            checkout_url: cashier.cashier_url,
            access_code: None,
            provider_reference: cashier.order_no,
            amount_minor,
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, GatewayError> {
        let body = json!({
            "country": COUNTRY,
            "reference": reference,
        });
        let status: StatusData = self
            .post("api/v1/international/cashier/status", body)
            .await?;
        status.try_into()
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        timestamp: Option<&str>,
    ) -> bool {
        let Some(timestamp) = timestamp else {
            return false;
        };
        let Ok(body) = serde_json::from_slice::<Value>(payload) else {
            return false;
        };
        constant_time_eq(&self.sign(&body, timestamp), signature.trim())
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<VerifiedPayment, GatewayError> {
        let event: WebhookEvent =
            serde_json::from_slice(payload).map_err(|e| GatewayError::Malformed {
                provider: PROVIDER,
                message: e.to_string(),
            })?;
        event.payload.try_into()
    }
}
