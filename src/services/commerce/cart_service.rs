use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::PricingConfig,
    db::is_unique_violation,
    entities::commerce::{cart, Cart as CartEntity},
    errors::ServiceError,
    models::{
        cart::{Cart, CartError},
        coupon::Coupon,
    },
    services::commerce::{coupons::CouponEvaluator, inventory::ProductCatalog},
};

const MAX_SAVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddCartItemInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCartItemInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    /// Zero or less removes the line
    #[validate(range(max = 1000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutOfStockItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub requested: i32,
    pub available: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StockCheck {
    pub valid: bool,
    pub out_of_stock: Vec<OutOfStockItem>,
}

/// Loads the active cart of `user_id` inside `conn`, if any.
pub(crate) async fn find_active_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<Cart>, ServiceError> {
    CartEntity::find()
        .filter(cart::Column::ActiveUserId.eq(user_id))
        .one(conn)
        .await?
        .map(Cart::try_from)
        .transpose()
}

/// Writes `cart` if nobody else wrote it since it was read. Returns the
/// stored cart with its bumped version.
pub(crate) async fn save_cart<C: ConnectionTrait>(
    conn: &C,
    cart: &Cart,
) -> Result<Cart, ServiceError> {
    let mut next = cart.clone();
    next.recompute_totals();
    next.version = cart.version + 1;
    next.updated_at = Utc::now();

    let result = CartEntity::update_many()
        .set(next.to_active_model()?)
        .filter(cart::Column::Id.eq(cart.id))
        .filter(cart::Column::Version.eq(cart.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(cart.id));
    }
    Ok(next)
}

/// Per-user shopping cart backed by one JSON document row.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    products: Arc<dyn ProductCatalog>,
    coupons: CouponEvaluator,
    pricing: PricingConfig,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        products: Arc<dyn ProductCatalog>,
        coupons: CouponEvaluator,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            db,
            products,
            coupons,
            pricing,
        }
    }

    /// Returns the user's active cart, creating one lazily. An expired cart
    /// is deactivated and replaced by an empty one.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<Cart, ServiceError> {
        let now = Utc::now();

        if let Some(existing) = find_active_cart(&*self.db, user_id).await? {
            if !existing.is_expired(now) {
                return Ok(existing);
            }

            info!(cart_id = %existing.id, "deactivating expired cart");
            let mut expired = existing;
            expired.is_active = false;
            match save_cart(&*self.db, &expired).await {
                Ok(_) | Err(ServiceError::ConcurrentModification(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let mut cart = Cart::new(user_id, self.pricing.cart_ttl(), now);
        cart.set_fees(self.pricing.standard_delivery_fee, Decimal::ZERO);

        match cart.to_active_model()?.insert(&*self.db).await {
            Ok(_) => {
                debug!(cart_id = %cart.id, "created cart");
                Ok(cart)
            }
            // Another request created the active cart first
            Err(e) if is_unique_violation(&e) => find_active_cart(&*self.db, user_id)
                .await?
                .ok_or(ServiceError::ConcurrentModification(cart.id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-reads the cart, applies `change` and saves it, retrying when a
    /// concurrent writer got in first.
    async fn mutate<F>(&self, user_id: Uuid, mut change: F) -> Result<Cart, ServiceError>
    where
        F: FnMut(&mut Cart) -> Result<(), ServiceError> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut cart = self.get_cart(user_id).await?;
            change(&mut cart)?;
            cart.expires_at = Utc::now() + self.pricing.cart_ttl();

            match save_cart(&*self.db, &cart).await {
                Ok(saved) => return Ok(saved),
                Err(ServiceError::ConcurrentModification(id)) if attempt < MAX_SAVE_ATTEMPTS => {
                    debug!(cart_id = %id, attempt, "cart changed concurrently, retrying");
                }
                Err(e) => {
                    if let ServiceError::ConcurrentModification(id) = &e {
                        warn!(cart_id = %id, "giving up after repeated cart conflicts");
                    }
                    return Err(e);
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddCartItemInput,
    ) -> Result<Cart, ServiceError> {
        input.validate()?;
        let product = self
            .products
            .snapshot(input.product_id, input.variant_id)
            .await?;

        self.mutate(user_id, |cart| {
            cart.add_item(&product, input.quantity)
                .map_err(ServiceError::from)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        input: UpdateCartItemInput,
    ) -> Result<Cart, ServiceError> {
        input.validate()?;
        let live = if input.quantity > 0 {
            self.products
                .live_stock(input.product_id, input.variant_id)
                .await?
        } else {
            None
        };

        self.mutate(user_id, |cart| {
            if let Some(stock) = live {
                cart.refresh_max_quantity(input.product_id, input.variant_id, stock);
            }
            cart.update_item_quantity(input.product_id, input.variant_id, input.quantity)
                .map_err(ServiceError::from)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<Cart, ServiceError> {
        self.mutate(user_id, |cart| {
            cart.remove_item(product_id, variant_id)
                .map_err(ServiceError::from)
        })
        .await
    }

    /// Validates `code` against the current cart and attaches it.
    #[instrument(skip(self))]
    pub async fn apply_coupon(&self, user_id: Uuid, code: &str) -> Result<Cart, ServiceError> {
        let code = Coupon::normalize_code(code);
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Coupon code is required".to_string(),
            ));
        }

        let current = self.get_cart(user_id).await?;
        if current.has_coupon(&code) {
            return Err(CartError::CouponAlreadyApplied.into());
        }
        let coupon = self
            .coupons
            .validate(&code, user_id, current.subtotal, &current.items, Utc::now())
            .await?;

        self.mutate(user_id, |cart| {
            cart.apply_coupon(
                code.clone(),
                coupon.promo_type,
                coupon.discount_value,
                Utc::now(),
            )
            .map(|_| ())
            .map_err(ServiceError::from)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn remove_coupon(&self, user_id: Uuid, code: &str) -> Result<Cart, ServiceError> {
        let code = Coupon::normalize_code(code);
        self.mutate(user_id, |cart| {
            cart.remove_coupon(&code).map_err(ServiceError::from)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<Cart, ServiceError> {
        self.mutate(user_id, |cart| {
            cart.clear();
            Ok(())
        })
        .await
    }

    /// Compares every line against live stock.
    pub async fn check_stock(&self, cart: &Cart) -> Result<StockCheck, ServiceError> {
        let mut out_of_stock = Vec::new();
        for item in &cart.items {
            let available = self
                .products
                .live_stock(item.product_id, item.variant_id)
                .await?
                .unwrap_or(0);
            if available < item.quantity {
                out_of_stock.push(OutOfStockItem {
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    name: item.name.clone(),
                    requested: item.quantity,
                    available: available.max(0),
                });
            }
        }
        Ok(StockCheck {
            valid: out_of_stock.is_empty(),
            out_of_stock,
        })
    }

    #[instrument(skip(self))]
    pub async fn validate_stock(&self, user_id: Uuid) -> Result<StockCheck, ServiceError> {
        let cart = self.get_cart(user_id).await?;
        self.check_stock(&cart).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cart::ProductSnapshot;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use sea_orm::{ConnectOptions, Database};

    async fn sqlite() -> DatabaseConnection {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();
        crate::db::run_migrations(&db).await.unwrap();
        db
    }

    #[tokio::test]
    async fn saved_cart_is_read_back_with_its_lines() {
        let db = sqlite().await;
        let user_id = Uuid::new_v4();
        let mut cart = Cart::new(user_id, Duration::hours(72), Utc::now());
        cart.to_active_model().unwrap().insert(&db).await.unwrap();

        let kettle = ProductSnapshot {
            product_id: Uuid::new_v4(),
            variant_id: None,
            name: "Kettle".to_string(),
            category: "kitchen".to_string(),
            unit_price: dec!(2500),
            stock: 10,
        };
        cart.add_item(&kettle, 3).unwrap();
        let saved = save_cart(&db, &cart).await.unwrap();
        assert_eq!(saved.version, 2);

        let stored = find_active_cart(&db, user_id).await.unwrap().expect("active cart");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.items[0].quantity, 3);
        assert_eq!(stored.subtotal, dec!(7500));

        let mut retired = stored.clone();
        retired.clear();
        retired.is_active = false;
        save_cart(&db, &retired).await.unwrap();
        assert!(find_active_cart(&db, user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_cart_write_is_refused() {
        let db = sqlite().await;
        let cart = Cart::new(Uuid::new_v4(), Duration::hours(72), Utc::now());
        cart.to_active_model().unwrap().insert(&db).await.unwrap();

        save_cart(&db, &cart).await.unwrap();
        let err = save_cart(&db, &cart).await.unwrap_err();
        assert!(matches!(err, ServiceError::ConcurrentModification(id) if id == cart.id));
    }
}
