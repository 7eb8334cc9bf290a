use crate::handlers::common::{success_response, validate_input};
use crate::{
    auth::AdminUser,
    errors::{ErrorResponse, ServiceError},
    models::order::Order,
    services::commerce::order_service::UpdateOrderStatusInput,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Admin routes, mounted at `/admin`; every handler requires the admin role
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/:slug/status", put(update_order_status))
        .route("/inventory/adjust", post(adjust_stock))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdjustStockRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    /// Signed change; negative removes units
    #[validate(range(min = -1_000_000, max = 1_000_000))]
    pub delta: i32,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub stock: i32,
}

/// Move an order through fulfilment, cancel or refund it
#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{slug}/status",
    params(("slug" = String, Path, description = "Order slug")),
    request_body = UpdateOrderStatusInput,
    responses(
        (status = 200, description = "Updated order", body = Order),
        (status = 400, description = "Transition not allowed", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(slug): Path<String>,
    Json(payload): Json<UpdateOrderStatusInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let order = state
        .services
        .orders
        .update_status(&admin, &slug, payload)
        .await?;
    Ok(success_response(order))
}

/// Apply a signed stock delta; stock never goes below zero
#[utoipa::path(
    post,
    path = "/api/v1/admin/inventory/adjust",
    request_body = AdjustStockRequest,
    responses(
        (status = 200, description = "New stock level", body = StockLevel),
        (status = 404, description = "Product not found", body = ErrorResponse),
        (status = 422, description = "Not enough stock to remove", body = ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn adjust_stock(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(payload): Json<AdjustStockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    if payload.delta == 0 {
        return Err(ServiceError::ValidationError(
            "delta must not be zero".to_string(),
        ));
    }

    let stock = state
        .services
        .inventory
        .adjust_stock(&*state.db, payload.product_id, payload.variant_id, payload.delta)
        .await?;
    info!(
        admin_id = %admin.user_id,
        product_id = %payload.product_id,
        delta = payload.delta,
        reason = payload.reason.as_deref().unwrap_or(""),
        "admin stock adjustment"
    );

    Ok(success_response(StockLevel {
        product_id: payload.product_id,
        variant_id: payload.variant_id,
        stock,
    }))
}
