use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, IntoActiveModel};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::commerce::cart;
use crate::errors::ServiceError;
use crate::services::commerce::pricing::{self, DiscountRule, PricedLine, PromoType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub category: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    /// Stock ceiling observed when the line was last touched
    pub max_quantity: i32,
    pub line_total: Decimal,
}

impl CartItem {
    pub fn matches(&self, product_id: Uuid, variant_id: Option<Uuid>) -> bool {
        self.product_id == product_id && self.variant_id == variant_id
    }
}

impl PricedLine for CartItem {
    fn unit_price(&self) -> Decimal {
        self.unit_price
    }
    fn quantity(&self) -> i32 {
        self.quantity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon {
    pub code: String,
    pub promo_type: PromoType,
    pub discount_value: Decimal,
    pub discount_amount: Decimal,
    pub applied_at: DateTime<Utc>,
}

impl DiscountRule for AppliedCoupon {
    fn promo_type(&self) -> PromoType {
        self.promo_type
    }
    fn discount_value(&self) -> Decimal {
        self.discount_value
    }
}

/// Live catalog data needed to put a product into a cart
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSnapshot {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub category: String,
    pub unit_price: Decimal,
    pub stock: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("Quantity must be at least 1")]
    InvalidQuantity,
    #[error("Only {available} unit(s) of {name} available")]
    ExceedsStock {
        name: String,
        requested: i32,
        available: i32,
    },
    #[error("Item not found in cart")]
    ItemNotFound,
    #[error("Coupon already applied")]
    CouponAlreadyApplied,
    #[error("Coupon not applied to this cart")]
    CouponNotApplied,
}

impl From<CartError> for ServiceError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::ExceedsStock { .. } => ServiceError::InsufficientStock(err.to_string()),
            CartError::ItemNotFound | CartError::CouponNotApplied => {
                ServiceError::NotFound(err.to_string())
            }
            CartError::CouponAlreadyApplied => ServiceError::CouponRejected(err.to_string()),
            CartError::InvalidQuantity => ServiceError::ValidationError(err.to_string()),
        }
    }
}

/// A user's pending selection. Every mutator ends with `recompute_totals`, so
/// the derived money fields are never taken from client input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub is_active: bool,
    pub items: Vec<CartItem>,
    pub applied_coupons: Vec<AppliedCoupon>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub delivery_fee: Decimal,
    pub service_charge: Decimal,
    pub total_amount: Decimal,
    #[serde(skip)]
    pub version: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(user_id: Uuid, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            is_active: true,
            items: Vec::new(),
            applied_coupons: Vec::new(),
            subtotal: Decimal::ZERO,
            discount: Decimal::ZERO,
            delivery_fee: Decimal::ZERO,
            service_charge: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            version: 1,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn has_coupon(&self, code: &str) -> bool {
        self.applied_coupons.iter().any(|c| c.code == code)
    }

    pub fn find_item(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Option<&CartItem> {
        self.items.iter().find(|i| i.matches(product_id, variant_id))
    }

    /// Adds `quantity` units, merging with an existing line for the same
    /// product and variant. The stock ceiling is refreshed from `product`.
    pub fn add_item(&mut self, product: &ProductSnapshot, quantity: i32) -> Result<(), CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity);
        }

        let existing = self
            .items
            .iter()
            .position(|i| i.matches(product.product_id, product.variant_id));
        let current = existing.map(|idx| self.items[idx].quantity).unwrap_or(0);
        let requested = current + quantity;

        if requested > product.stock {
            return Err(CartError::ExceedsStock {
                name: product.name.clone(),
                requested,
                available: product.stock.max(0),
            });
        }

        match existing {
            Some(idx) => {
                let line = &mut self.items[idx];
                line.quantity = requested;
                line.max_quantity = product.stock;
                line.unit_price = product.unit_price;
                line.name = product.name.clone();
            }
            None => self.items.push(CartItem {
                product_id: product.product_id,
                variant_id: product.variant_id,
                name: product.name.clone(),
                category: product.category.clone(),
                unit_price: product.unit_price,
                quantity,
                max_quantity: product.stock,
                line_total: Decimal::ZERO,
            }),
        }

        self.recompute_totals();
        Ok(())
    }

    pub fn remove_item(
        &mut self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| !i.matches(product_id, variant_id));
        if self.items.len() == before {
            return Err(CartError::ItemNotFound);
        }
        self.recompute_totals();
        Ok(())
    }

    /// Sets the quantity of a line; zero or less removes it.
    pub fn update_item_quantity(
        &mut self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    ) -> Result<(), CartError> {
        if quantity <= 0 {
            return self.remove_item(product_id, variant_id);
        }

        let line = self
            .items
            .iter_mut()
            .find(|i| i.matches(product_id, variant_id))
            .ok_or(CartError::ItemNotFound)?;

        if quantity > line.max_quantity {
            return Err(CartError::ExceedsStock {
                name: line.name.clone(),
                requested: quantity,
                available: line.max_quantity.max(0),
            });
        }

        line.quantity = quantity;
        self.recompute_totals();
        Ok(())
    }

    /// Refreshes the stock ceiling of a line from live stock.
    pub fn refresh_max_quantity(&mut self, product_id: Uuid, variant_id: Option<Uuid>, stock: i32) {
        if let Some(line) = self
            .items
            .iter_mut()
            .find(|i| i.matches(product_id, variant_id))
        {
            line.max_quantity = stock;
        }
    }

    /// Attaches an already validated coupon. `code` must be normalized.
    pub fn apply_coupon(
        &mut self,
        code: String,
        promo_type: PromoType,
        discount_value: Decimal,
        now: DateTime<Utc>,
    ) -> Result<&AppliedCoupon, CartError> {
        if self.has_coupon(&code) {
            return Err(CartError::CouponAlreadyApplied);
        }

        self.applied_coupons.push(AppliedCoupon {
            code,
            promo_type,
            discount_value,
            discount_amount: Decimal::ZERO,
            applied_at: now,
        });
        self.recompute_totals();

        self.applied_coupons
            .last()
            .ok_or(CartError::CouponNotApplied)
    }

    pub fn remove_coupon(&mut self, code: &str) -> Result<(), CartError> {
        let before = self.applied_coupons.len();
        self.applied_coupons.retain(|c| c.code != code);
        if self.applied_coupons.len() == before {
            return Err(CartError::CouponNotApplied);
        }
        self.recompute_totals();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.applied_coupons.clear();
        self.recompute_totals();
    }

    pub fn set_fees(&mut self, delivery_fee: Decimal, service_charge: Decimal) {
        self.delivery_fee = delivery_fee;
        self.service_charge = service_charge;
        self.recompute_totals();
    }

    /// Re-derives line totals, coupon discounts and the cart totals.
    pub fn recompute_totals(&mut self) {
        let totals = pricing::compute_totals(
            &self.items,
            &self.applied_coupons,
            self.delivery_fee,
            self.service_charge,
        );

        for (line, total) in self.items.iter_mut().zip(totals.line_totals) {
            line.line_total = total;
        }
        for (coupon, amount) in self
            .applied_coupons
            .iter_mut()
            .zip(totals.coupon_discounts)
        {
            coupon.discount_amount = amount;
        }

        self.subtotal = totals.subtotal;
        self.discount = totals.discount;
        self.total_amount = totals.total_amount;
    }

    /// Every column is `Set`, so the same model serves inserts and
    /// version-guarded `update_many` writes.
    pub fn to_active_model(&self) -> Result<cart::ActiveModel, ServiceError> {
        Ok(cart::Model {
            id: self.id,
            user_id: self.user_id,
            is_active: self.is_active,
            active_user_id: self.is_active.then_some(self.user_id),
            items: serde_json::to_value(&self.items)?,
            applied_coupons: serde_json::to_value(&self.applied_coupons)?,
            subtotal: self.subtotal,
            discount: self.discount,
            delivery_fee: self.delivery_fee,
            service_charge: self.service_charge,
            total_amount: self.total_amount,
            version: self.version,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_active_model()
        .reset_all())
    }
}

impl TryFrom<cart::Model> for Cart {
    type Error = ServiceError;

    fn try_from(model: cart::Model) -> Result<Self, Self::Error> {
        let mut cart = Self {
            id: model.id,
            user_id: model.user_id,
            is_active: model.is_active,
            items: serde_json::from_value(model.items)?,
            applied_coupons: serde_json::from_value(model.applied_coupons)?,
            subtotal: model.subtotal,
            discount: model.discount,
            delivery_fee: pricing::round_money(model.delivery_fee),
            service_charge: pricing::round_money(model.service_charge),
            total_amount: model.total_amount,
            version: model.version,
            expires_at: model.expires_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        };
        cart.recompute_totals();
        Ok(cart)
    }
}
