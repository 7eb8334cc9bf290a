use crate::handlers::common::{created_response, validate_input};
use crate::{
    auth::AuthUser,
    errors::{ErrorResponse, ServiceError},
    services::commerce::checkout_service::{CheckoutInput, CheckoutResult},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};

pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/checkout", post(checkout))
}

/// Place an order from the caller's cart and open the payment session.
///
/// A provider that fails to open a session does not fail the request: the
/// order is returned with `payment.success = false` and can be retried via
/// `POST /orders/{slug}/payment`.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutInput,
    responses(
        (status = 201, description = "Order placed", body = CheckoutResult),
        (status = 400, description = "Empty cart, invalid input or rejected coupon", body = ErrorResponse),
        (status = 422, description = "Insufficient stock", body = ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let result = state.services.checkout.checkout(&user, payload).await?;
    Ok(created_response(result))
}
