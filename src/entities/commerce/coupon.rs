use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Stored uppercase
    #[sea_orm(unique)]
    pub coupon_code: String,
    pub promo_type: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_value: Decimal,
    #[sea_orm(nullable)]
    pub usage_limit: Option<i32>,
    #[sea_orm(nullable)]
    pub per_user_limit: Option<i32>,
    pub current_usage: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub minimum_order_value: Decimal,
    /// JSON array of category names
    #[sea_orm(column_type = "Json")]
    pub applicable_categories: Json,
    /// JSON array of product ids
    #[sea_orm(column_type = "Json")]
    pub applicable_products: Json,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
