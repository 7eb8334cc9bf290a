use crate::handlers::common::{success_response, validate_input};
use crate::{
    auth::AuthUser,
    errors::{ErrorResponse, ServiceError},
    models::cart::Cart,
    services::commerce::cart_service::{AddCartItemInput, StockCheck, UpdateCartItemInput},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Routes for the caller's own cart, mounted at `/cart`
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item).patch(update_item))
        .route("/items/:product_id", delete(remove_item))
        .route("/coupons", post(apply_coupon))
        .route("/coupons/:code", delete(remove_coupon))
        .route("/stock", get(validate_stock))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct VariantQuery {
    pub variant_id: Option<Uuid>,
}

/// Get the active cart, creating an empty one if needed
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Active cart", body = Cart),
        (status = 401, description = "Missing identity", body = ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.get_cart(user.user_id).await?;
    Ok(success_response(cart))
}

/// Add a product (or variant) to the cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddCartItemInput,
    responses(
        (status = 200, description = "Updated cart", body = Cart),
        (status = 400, description = "Invalid quantity or exceeds stock", body = ErrorResponse),
        (status = 404, description = "Product not found", body = ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddCartItemInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let cart = state.services.carts.add_item(user.user_id, payload).await?;
    Ok(success_response(cart))
}

/// Set the quantity of a line; zero removes it
#[utoipa::path(
    patch,
    path = "/api/v1/cart/items",
    request_body = UpdateCartItemInput,
    responses(
        (status = 200, description = "Updated cart", body = Cart),
        (status = 404, description = "Item not in cart", body = ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UpdateCartItemInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let cart = state
        .services
        .carts
        .update_item_quantity(user.user_id, payload)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product id"), VariantQuery),
    responses((status = 200, description = "Updated cart", body = Cart)),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    Query(query): Query<VariantQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .remove_item(user.user_id, product_id, query.variant_id)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/coupons",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Coupon applied", body = Cart),
        (status = 400, description = "Coupon rejected", body = ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let cart = state
        .services
        .carts
        .apply_coupon(user.user_id, &payload.code)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/coupons/{code}",
    params(("code" = String, Path, description = "Coupon code")),
    responses((status = 200, description = "Coupon removed", body = Cart)),
    tag = "Cart"
)]
pub async fn remove_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .remove_coupon(user.user_id, &code)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    responses((status = 200, description = "Emptied cart", body = Cart)),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.clear(user.user_id).await?;
    Ok(success_response(cart))
}

/// Compare every line with live stock before checkout
#[utoipa::path(
    get,
    path = "/api/v1/cart/stock",
    responses((status = 200, description = "Stock check", body = StockCheck)),
    tag = "Cart"
)]
pub async fn validate_stock(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let check = state.services.carts.validate_stock(user.user_id).await?;
    Ok(success_response(check))
}
