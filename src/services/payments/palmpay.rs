use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::signing::{canonical_json, constant_time_eq, hmac_sha256_hex};
use super::{
    join_url, read_json, to_minor_units, GatewayError, InitializedPayment, PaymentData,
    PaymentGateway, PaymentProvider, ProviderPaymentStatus, VerifiedPayment,
};
use crate::config::ProviderCredentials;

const PROVIDER: PaymentProvider = PaymentProvider::Palmpay;
const API_VERSION: &str = "V1.1";
const SUCCESS_CODE: &str = "00000000";
pub const SIGNATURE_HEADER: &str = "x-palmpay-signature";
pub const TIMESTAMP_HEADER: &str = "x-palmpay-timestamp";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    resp_code: String,
    #[serde(default)]
    resp_msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderData {
    order_no: Option<String>,
    checkout_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderStatusData {
    order_id: String,
    order_no: Option<String>,
    order_status: i32,
    amount: i64,
    currency: Option<String>,
    /// Unix millis
    complete_time: Option<i64>,
    error_msg: Option<String>,
}

/// 1 pending, 2 paid, 3 failed, 4 closed
fn map_status(code: i32) -> ProviderPaymentStatus {
    match code {
        2 => ProviderPaymentStatus::Success,
        3 | 4 => ProviderPaymentStatus::Failed,
        _ => ProviderPaymentStatus::Pending,
    }
}

impl From<OrderStatusData> for VerifiedPayment {
    fn from(data: OrderStatusData) -> Self {
        let status = map_status(data.order_status);
        VerifiedPayment {
            provider: PROVIDER,
            reference: data.order_id,
            status,
            amount_minor: data.amount,
            currency: data.currency,
            transaction_id: data.order_no,
            paid_at: data
                .complete_time
                .filter(|_| status == ProviderPaymentStatus::Success)
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            message: data.error_msg,
        }
    }
}

/// PalmPay: every request body and webhook is signed with
/// HMAC-SHA256(secret, canonical JSON + timestamp).
pub struct PalmPayGateway {
    client: reqwest::Client,
    credentials: ProviderCredentials,
}

impl PalmPayGateway {
    pub fn new(client: reqwest::Client, credentials: ProviderCredentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    pub fn sign(&self, body: &Value, timestamp: &str) -> Result<String, GatewayError> {
        let message = format!("{}{}", canonical_json(body), timestamp);
        Ok(hmac_sha256_hex(
            self.credentials.secret_key.as_bytes(),
            message.as_bytes(),
        )?)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
    ) -> Result<T, GatewayError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&body, &timestamp)?;

        let response = self
            .client
            .post(join_url(&self.credentials.base_url, path))
            .bearer_auth(&self.credentials.public_key)
            .header("CountryCode", "NG")
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, timestamp)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e))?;

        let envelope: Envelope<T> = read_json(PROVIDER, response).await?;
        match envelope {
            Envelope {
                resp_code,
                data: Some(data),
                ..
            } if resp_code == SUCCESS_CODE => Ok(data),
            Envelope {
                resp_code,
                resp_msg,
                ..
            } => Err(GatewayError::Rejected {
                provider: PROVIDER,
                message: format!(
                    "{} ({})",
                    resp_msg.unwrap_or_else(|| "request refused".into()),
                    resp_code
                ),
            }),
        }
    }

    fn envelope_fields() -> Value {
        json!({
            "requestTime": Utc::now().timestamp_millis(),
            "version": API_VERSION,
            "nonceStr": Uuid::new_v4().simple().to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for PalmPayGateway {
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
        let mut body = Self::envelope_fields();
        body["orderId"] = json!(data.reference);
        body["amount"] = json!(amount_minor);
        body["currency"] = json!(data.currency);
        body["notifyUrl"] = json!(data.callback_url);
        body["callBackUrl"] = json!(data.callback_url);
        body["title"] = json!(data.description);
        body["userId"] = json!(data.user_id);
        body["metadata"] = json!({
            "orderIds": data.order_ids,
            "userId": data.user_id,
        });
        if let Some(merchant_id) = &self.credentials.merchant_id {
            body["merchantId"] = json!(merchant_id);
        }

        let created: CreateOrderData = self
            .post("api/v2/payment/merchant/createorder", body)
            .await?;
        debug!(order_no = ?created.order_no, "palmpay order created");

        Ok(InitializedPayment {
            reference: data.reference.clone(),
            checkout_url: created.checkout_url,
            access_code: None,
            provider_reference: created.order_no,
            amount_minor,
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, GatewayError> {
        let mut body = Self::envelope_fields();
        body["orderId"] = json!(reference);
        let status: OrderStatusData = self
            .post("api/v2/payment/merchant/order/queryStatus", body)
            .await?;
        Ok(status.into())
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
        match self.sign(&body, timestamp) {
            Ok(expected) => constant_time_eq(&expected, signature.trim()),
            Err(e) => {
                warn!(error = %e, "palmpay webhook signing failed");
                false
            }
        }
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<VerifiedPayment, GatewayError> {
        let data: OrderStatusData =
            serde_json::from_slice(payload).map_err(|e| GatewayError::Malformed {
                provider: PROVIDER,
                message: e.to_string(),
            })?;
        Ok(data.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> PalmPayGateway {
        PalmPayGateway::new(
            reqwest::Client::new(),
            ProviderCredentials {
                base_url: "http://localhost".into(),
                public_key: "app-id".into(),
                secret_key: "palm-secret".into(),
                merchant_id: Some("M1".into()),
                app_id: None,
            },
        )
    }

    #[test]
    fn signature_ignores_key_order_but_not_content() {
        let gw = gateway();
        let body = br#"{"orderStatus":2,"orderId":"PAY_1_1","amount":5000}"#;
        let reordered = json!({"amount": 5000, "orderId": "PAY_1_1", "orderStatus": 2});
        let signature = gw.sign(&reordered, "1700000000000").unwrap();

        assert!(gw.verify_webhook_signature(body, &signature, Some("1700000000000")));
        assert!(!gw.verify_webhook_signature(body, &signature, Some("1700000000001")));
        assert!(!gw.verify_webhook_signature(body, &signature, None));

        let tampered = br#"{"orderStatus":2,"orderId":"PAY_1_1","amount":5001}"#;
        assert!(!gw.verify_webhook_signature(tampered, &signature, Some("1700000000000")));
    }

    #[test]
    fn status_codes() {
        assert_eq!(map_status(2), ProviderPaymentStatus::Success);
        assert_eq!(map_status(3), ProviderPaymentStatus::Failed);
        assert_eq!(map_status(1), ProviderPaymentStatus::Pending);
    }

    #[test]
    fn webhook_body_is_normalized() {
        let body = br#"{"orderId":"PAY_x_1","orderNo":"PP123","orderStatus":2,"amount":250000,"currency":"NGN","completeTime":1717236000000}"#;
        let verified = gateway().parse_webhook(body).unwrap();
        assert_eq!(verified.status, ProviderPaymentStatus::Success);
        assert_eq!(verified.amount_minor, 250000);
        assert_eq!(verified.transaction_id.as_deref(), Some("PP123"));
        assert!(verified.paid_at.is_some());
    }
}
