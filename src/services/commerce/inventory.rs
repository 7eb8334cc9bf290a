//! Product lookup and the only code that writes stock.
//!
//! Every stock change is a single conditional `UPDATE`, so two checkouts
//! racing for the last units are serialized by the database: the loser
//! matches zero rows and is told the stock is insufficient.

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::commerce::{product, product_variant, Product, ProductVariant};
use crate::errors::ServiceError;
use crate::models::cart::ProductSnapshot;
use crate::models::order::OrderItem;

/// Read side of the product catalog used by carts
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Live name, price and stock for a sellable product or variant
    async fn snapshot(
        &self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<ProductSnapshot, ServiceError>;

    /// `None` when the product or variant no longer exists
    async fn live_stock(
        &self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<Option<i32>, ServiceError>;
}

#[derive(Clone)]
pub struct DbProductCatalog {
    db: Arc<DatabaseConnection>,
}

impl DbProductCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProductCatalog for DbProductCatalog {
    async fn snapshot(
        &self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<ProductSnapshot, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        match variant_id {
            None => Ok(ProductSnapshot {
                product_id,
                variant_id: None,
                name: product.name,
                category: product.category,
                unit_price: product.price,
                stock: product.stock,
            }),
            Some(variant_id) => {
                let variant = ProductVariant::find_by_id(variant_id)
                    .filter(product_variant::Column::ProductId.eq(product_id))
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Variant {} not found", variant_id))
                    })?;
                Ok(ProductSnapshot {
                    product_id,
                    variant_id: Some(variant_id),
                    name: format!("{} - {}", product.name, variant.name),
                    category: product.category,
                    unit_price: variant.price.unwrap_or(product.price),
                    stock: variant.stock,
                })
            }
        }
    }

    async fn live_stock(
        &self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<Option<i32>, ServiceError> {
        current_stock(&*self.db, product_id, variant_id)
            .await
            .map_err(Into::into)
    }
}

async fn current_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    variant_id: Option<Uuid>,
) -> Result<Option<i32>, DbErr> {
    Ok(match variant_id {
        Some(variant_id) => ProductVariant::find_by_id(variant_id)
            .filter(product_variant::Column::ProductId.eq(product_id))
            .one(conn)
            .await?
            .map(|v| v.stock),
        None => Product::find_by_id(product_id)
            .one(conn)
            .await?
            .map(|p| p.stock),
    })
}

/// `stock = stock - quantity` guarded by `stock >= quantity`; returns rows hit.
async fn decrement<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    quantity: i32,
) -> Result<u64, DbErr> {
    let now = Utc::now();
    let result = match variant_id {
        Some(variant_id) => {
            ProductVariant::update_many()
                .col_expr(
                    product_variant::Column::Stock,
                    Expr::col(product_variant::Column::Stock).sub(quantity),
                )
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                .filter(product_variant::Column::Id.eq(variant_id))
                .filter(product_variant::Column::ProductId.eq(product_id))
                .filter(product_variant::Column::Stock.gte(quantity))
                .exec(conn)
                .await?
        }
        None => {
            Product::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).sub(quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::Stock.gte(quantity))
                .exec(conn)
                .await?
        }
    };
    Ok(result.rows_affected)
}

async fn increment<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    quantity: i32,
) -> Result<u64, DbErr> {
    let now = Utc::now();
    let result = match variant_id {
        Some(variant_id) => {
            ProductVariant::update_many()
                .col_expr(
                    product_variant::Column::Stock,
                    Expr::col(product_variant::Column::Stock).add(quantity),
                )
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                .filter(product_variant::Column::Id.eq(variant_id))
                .filter(product_variant::Column::ProductId.eq(product_id))
                .exec(conn)
                .await?
        }
        None => {
            Product::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).add(quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(product_id))
                .exec(conn)
                .await?
        }
    };
    Ok(result.rows_affected)
}

/// Stock writer shared by checkout, cancellation and admin edits.
///
/// Methods take any connection so callers can run them inside their own
/// transaction; a failed reservation leaves rolling back to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryAdjuster;

impl InventoryAdjuster {
    pub fn new() -> Self {
        Self
    }

    /// Reserves every line or fails on the first one that cannot be covered.
    #[instrument(skip(self, conn, items), fields(lines = items.len()))]
    pub async fn reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        items: &[OrderItem],
    ) -> Result<(), ServiceError> {
        for item in items {
            let hit = decrement(conn, item.product_id, item.variant_id, item.quantity).await?;
            if hit == 0 {
                counter!("settlement.inventory.stock_conflicts", 1);
                let available = current_stock(conn, item.product_id, item.variant_id)
                    .await?
                    .unwrap_or(0);
                warn!(
                    product_id = %item.product_id,
                    variant_id = ?item.variant_id,
                    requested = item.quantity,
                    available,
                    "stock reservation rejected"
                );
                return Err(ServiceError::InsufficientStock(format!(
                    "{} (requested {}, available {})",
                    item.name,
                    item.quantity,
                    available.max(0)
                )));
            }
        }
        Ok(())
    }

    /// Returns reserved units to stock.
    #[instrument(skip(self, conn, items), fields(lines = items.len()))]
    pub async fn release<C: ConnectionTrait>(
        &self,
        conn: &C,
        items: &[OrderItem],
    ) -> Result<(), ServiceError> {
        for item in items {
            let hit = increment(conn, item.product_id, item.variant_id, item.quantity).await?;
            if hit == 0 {
                warn!(product_id = %item.product_id, "restock skipped, product no longer exists");
            }
        }
        Ok(())
    }

    /// Applies a signed stock delta and returns the new level. Never lets
    /// stock go negative.
    #[instrument(skip(self, conn))]
    pub async fn adjust_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        delta: i32,
    ) -> Result<i32, ServiceError> {
        let hit = if delta >= 0 {
            increment(conn, product_id, variant_id, delta).await?
        } else {
            decrement(conn, product_id, variant_id, -delta).await?
        };

        let stock = current_stock(conn, product_id, variant_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if hit == 0 {
            counter!("settlement.inventory.stock_conflicts", 1);
            return Err(ServiceError::InsufficientStock(format!(
                "cannot remove {} unit(s), only {} in stock",
                -delta, stock
            )));
        }

        info!(%product_id, variant_id = ?variant_id, delta, stock, "stock adjusted");
        Ok(stock)
    }
}
