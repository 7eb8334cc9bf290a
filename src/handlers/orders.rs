use crate::handlers::common::{success_response, validate_input, PaginatedResponse, PaginationParams};
use crate::{
    auth::AuthUser,
    errors::{ErrorResponse, ServiceError},
    models::order::Order,
    services::commerce::{
        checkout_service::{CheckoutResult, RetryPaymentInput},
        order_service::{CancelOrderInput, RateOrderInput, ReturnOrderInput},
    },
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};

/// Customer order routes, mounted at `/orders`
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:slug", get(get_order))
        .route("/:slug/cancel", post(cancel_order))
        .route("/:slug/return", post(request_return))
        .route("/:slug/rating", post(rate_order))
        .route("/:slug/payment", post(retry_payment))
}

/// List the caller's orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses((status = 200, description = "Page of orders")),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .services
        .orders
        .list_orders(user.user_id, params.page, params.per_page)
        .await?;
    Ok(success_response(PaginatedResponse::<Order>::from(page)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{slug}",
    params(("slug" = String, Path, description = "Order slug")),
    responses(
        (status = 200, description = "Order", body = Order),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(&user, &slug).await?;
    Ok(success_response(order))
}

/// Cancel a pending or confirmed order; reserved stock is returned
#[utoipa::path(
    post,
    path = "/api/v1/orders/{slug}/cancel",
    params(("slug" = String, Path, description = "Order slug")),
    request_body = CancelOrderInput,
    responses(
        (status = 200, description = "Cancelled order", body = Order),
        (status = 400, description = "Order can no longer be cancelled", body = ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(slug): Path<String>,
    payload: Option<Json<CancelOrderInput>>,
) -> Result<impl IntoResponse, ServiceError> {
    let input = payload.map(|Json(p)| p).unwrap_or_default();
    validate_input(&input)?;
    let order = state
        .services
        .orders
        .cancel_order(&user, &slug, input)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{slug}/return",
    params(("slug" = String, Path, description = "Order slug")),
    request_body = ReturnOrderInput,
    responses(
        (status = 200, description = "Return requested", body = Order),
        (status = 400, description = "Order is not delivered", body = ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn request_return(
    State(state): State<AppState>,
    user: AuthUser,
    Path(slug): Path<String>,
    Json(payload): Json<ReturnOrderInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let order = state
        .services
        .orders
        .request_return(&user, &slug, payload)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{slug}/rating",
    params(("slug" = String, Path, description = "Order slug")),
    request_body = RateOrderInput,
    responses(
        (status = 200, description = "Rated order", body = Order),
        (status = 400, description = "Rating out of range or order not delivered", body = ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn rate_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(slug): Path<String>,
    Json(payload): Json<RateOrderInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let order = state
        .services
        .orders
        .rate_order(&user, &slug, payload)
        .await?;
    Ok(success_response(order))
}

/// Re-open the payment session of an order whose initialization failed
#[utoipa::path(
    post,
    path = "/api/v1/orders/{slug}/payment",
    params(("slug" = String, Path, description = "Order slug")),
    request_body = RetryPaymentInput,
    responses(
        (status = 200, description = "New payment session", body = CheckoutResult),
        (status = 400, description = "Order is not awaiting payment", body = ErrorResponse),
        (status = 409, description = "Payment already in progress", body = ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(slug): Path<String>,
    payload: Option<Json<RetryPaymentInput>>,
) -> Result<impl IntoResponse, ServiceError> {
    let input = payload.map(|Json(p)| p).unwrap_or_default();
    validate_input(&input)?;
    let result = state
        .services
        .checkout
        .retry_payment(&user, &slug, input)
        .await?;
    Ok(success_response(result))
}
