//! Provider-facing payment endpoints: the customer redirect, server-to-server
//! webhooks and the fee estimate shown before checkout.

use crate::handlers::common::success_response;
use crate::{
    errors::{ErrorResponse, ServiceError},
    services::payments::{reconciliation::ReconcileOutcome, PaymentGatewayFacade},
    AppState,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, RawQuery, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

/// Mounted at `/payments`. Webhooks carry no user identity; they are
/// authenticated by the provider signature instead.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/callback", get(payment_callback))
        .route("/webhook/:provider", post(payment_webhook))
        .route("/fees", get(estimate_fees))
}

/// Query of the customer redirect. Providers append their own parameters
/// (Paystack repeats `reference` and adds `trxref`), so the first occurrence
/// of each key wins.
#[derive(Debug, Default, PartialEq, Eq)]
struct CallbackParams {
    provider: Option<String>,
    reference: Option<String>,
    platform: Option<String>,
}

impl CallbackParams {
    fn parse(raw: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "provider" => &mut params.provider,
                "reference" | "trxref" => &mut params.reference,
                "platform" => &mut params.platform,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        params
    }
}

fn with_query(base: &str, key: &str, value: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    format!("{}{}{}={}", base, separator, key, encoded)
}

/// Where the provider sends the customer after payment. The payment is
/// verified with the provider and reconciled before redirecting to the
/// completed page (`?slugs=`) or back to the cart (`?error=`).
#[utoipa::path(
    get,
    path = "/api/v1/payments/callback",
    params(
        ("provider" = String, Query, description = "paystack, palmpay or opay"),
        ("reference" = String, Query, description = "Transaction reference"),
        ("platform" = Option<String>, Query, description = "web or mobile")
    ),
    responses((status = 303, description = "Redirect to the frontend")),
    tag = "Payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Redirect {
    let params = CallbackParams::parse(raw.as_deref().unwrap_or_default());
    let payments = &state.config.payments;
    let platform = params.platform.as_deref();
    let to_cart =
        |message: &str| Redirect::to(&with_query(payments.cart_url_for(platform), "error", message));

    let Some(reference) = params.reference.as_deref() else {
        warn!("payment callback without reference");
        return to_cart("Missing payment reference");
    };
    let provider = match params
        .provider
        .as_deref()
        .map(PaymentGatewayFacade::provider)
    {
        Some(Ok(provider)) => provider,
        _ => {
            warn!(reference, provider = ?params.provider, "payment callback with unknown provider");
            return to_cart("Unknown payment provider");
        }
    };

    match state
        .services
        .reconciliation
        .verify_and_reconcile(provider, reference)
        .await
    {
        Ok(outcome) if outcome.is_success() => {
            let slugs = outcome.order_slugs().join(",");
            info!(reference, %provider, slugs = %slugs, "payment callback confirmed");
            Redirect::to(&with_query(
                payments.completed_url_for(platform),
                "slugs",
                &slugs,
            ))
        }
        Ok(ReconcileOutcome::PaymentFailed { reason, .. }) => to_cart(&reason),
        Ok(ReconcileOutcome::StillPending) => {
            to_cart("Payment is still being processed, please check your orders shortly")
        }
        Ok(_) => to_cart("Payment could not be verified"),
        Err(e) => {
            warn!(reference, %provider, error = %e, "payment callback failed");
            to_cart(&e.response_message())
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: String,
}

/// Server-to-server notification from a provider. The raw body is checked
/// against the provider's signature header before anything is parsed;
/// duplicates are acknowledged without changing state.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook/{provider}",
    params(("provider" = String, Path, description = "paystack, palmpay or opay")),
    request_body = String,
    responses(
        (status = 200, description = "Processed or already processed", body = WebhookAck),
        (status = 401, description = "Invalid signature", body = ErrorResponse),
        (status = 422, description = "Report does not match the ledger", body = ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let gateway = state.services.gateways.gateway_for_key(&provider)?;
    let signature = headers
        .get(gateway.signature_header())
        .and_then(|v| v.to_str().ok());
    let timestamp = gateway
        .timestamp_header()
        .and_then(|name| headers.get(name))
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .services
        .reconciliation
        .handle_webhook(&provider, &body, signature, timestamp)
        .await?;

    if let ReconcileOutcome::Rejected { reason } = &outcome {
        return Err(ServiceError::ReconciliationAnomaly(reason.clone()));
    }
    Ok(success_response(WebhookAck {
        received: true,
        outcome: outcome.as_str().to_string(),
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuery {
    pub sub_total: Decimal,
    pub provider: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub provider: String,
    pub sub_total: Decimal,
    pub service_charge: Decimal,
    pub total: Decimal,
}

/// Service charge a payment method adds on top of `subTotal`
#[utoipa::path(
    get,
    path = "/api/v1/payments/fees",
    params(FeeQuery),
    responses(
        (status = 200, description = "Fee estimate", body = FeeEstimate),
        (status = 400, description = "Unknown provider or negative amount", body = ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn estimate_fees(
    State(state): State<AppState>,
    Query(query): Query<FeeQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    if query.sub_total.is_sign_negative() {
        return Err(ServiceError::ValidationError(
            "subTotal must not be negative".to_string(),
        ));
    }
    let service_charge = state
        .services
        .gateways
        .compute_fee(&query.provider, query.sub_total)?;

    Ok(success_response(FeeEstimate {
        provider: query.provider.trim().to_ascii_lowercase(),
        sub_total: query.sub_total,
        service_charge,
        total: query.sub_total + service_charge,
    }))
}
