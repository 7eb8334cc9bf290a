use crate::{
    errors::ServiceError, models::order::Order, services::commerce::order_service::OrderPage,
    ApiResponse,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// 200 with the standard envelope
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// 201 with the standard envelope
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

/// `?page=&perPage=`; the order service clamps out-of-range values.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    #[serde(default = "first_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn first_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

/// A page of the caller's orders as returned by `GET /orders`
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl From<OrderPage> for PaginatedResponse<Order> {
    fn from(page: OrderPage) -> Self {
        let total_pages = if page.per_page == 0 {
            0
        } else {
            page.total.div_ceil(page.per_page)
        };
        Self {
            data: page.orders,
            pagination: PaginationMeta {
                page: page.page,
                per_page: page.per_page,
                total: page.total,
                total_pages,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(total: u64, per_page: u64) -> PaginatedResponse<Order> {
        OrderPage {
            orders: Vec::new(),
            page: 1,
            per_page,
            total,
        }
        .into()
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(page(41, 20).pagination.total_pages, 3);
        assert_eq!(page(40, 20).pagination.total_pages, 2);
        assert_eq!(page(0, 20).pagination.total_pages, 0);
    }
}
