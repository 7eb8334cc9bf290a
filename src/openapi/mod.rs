use axum::{response::IntoResponse, routing::get, Json, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Settlement API",
        version = "1.0.0",
        description = r#"
# Checkout and payment settlement

Carts, coupon pricing, order placement with stock reservation, and payment
through Paystack, PalmPay or OPay with idempotent reconciliation of provider
callbacks and webhooks.

## Identity

Customer and admin endpoints expect the upstream gateway to forward the
caller as headers:

```
x-user-id: <uuid>
x-user-role: admin        (admin endpoints only)
x-user-email: <address>   (optional)
```

Webhooks carry no identity and are authenticated by the provider signature.

## Error Handling

Failures share one body:

```json
{
  "error": "Bad Request",
  "message": "Validation error: Cart is empty",
  "request_id": "7d1f...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "The caller's active cart"),
        (name = "Checkout", description = "Order placement"),
        (name = "Orders", description = "Order queries and customer actions"),
        (name = "Payments", description = "Provider redirects, webhooks and fees"),
        (name = "Admin", description = "Fulfilment and stock administration"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_item,
        crate::handlers::cart::update_item,
        crate::handlers::cart::remove_item,
        crate::handlers::cart::apply_coupon,
        crate::handlers::cart::remove_coupon,
        crate::handlers::cart::clear_cart,
        crate::handlers::cart::validate_stock,

        // Checkout
        crate::handlers::checkout::checkout,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::request_return,
        crate::handlers::orders::rate_order,
        crate::handlers::orders::retry_payment,

        // Payments
        crate::handlers::payments::payment_callback,
        crate::handlers::payments::payment_webhook,
        crate::handlers::payments::estimate_fees,

        // Admin
        crate::handlers::admin::update_order_status,
        crate::handlers::admin::adjust_stock,

        // Health
        crate::handlers::health::liveness_check,
        crate::handlers::health::readiness_check,
    ),
    components(
        schemas(
            crate::models::cart::Cart,
            crate::models::cart::CartItem,
            crate::models::cart::AppliedCoupon,
            crate::models::order::Order,
            crate::models::order::OrderItem,
            crate::models::order::PaymentInfo,
            crate::models::order::StatusHistoryEntry,
            crate::services::commerce::cart_service::AddCartItemInput,
            crate::services::commerce::cart_service::UpdateCartItemInput,
            crate::services::commerce::cart_service::StockCheck,
            crate::services::commerce::checkout_service::CheckoutInput,
            crate::services::commerce::checkout_service::RetryPaymentInput,
            crate::services::commerce::checkout_service::CheckoutResult,
            crate::services::commerce::order_service::CancelOrderInput,
            crate::services::commerce::order_service::ReturnOrderInput,
            crate::services::commerce::order_service::RateOrderInput,
            crate::services::commerce::order_service::UpdateOrderStatusInput,
            crate::services::payments::GatewayResponse,
            crate::services::payments::InitializedPayment,
            crate::handlers::cart::ApplyCouponRequest,
            crate::handlers::admin::AdjustStockRequest,
            crate::handlers::admin::StockLevel,
            crate::handlers::payments::WebhookAck,
            crate::handlers::payments::FeeEstimate,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/api-docs/openapi.json", get(openapi_json))
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_settlement_paths() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Settlement API"));
        assert!(json.contains("/api/v1/checkout"));
        assert!(json.contains("/api/v1/payments/webhook/{provider}"));
        assert!(json.contains("ErrorResponse"));
    }
}
