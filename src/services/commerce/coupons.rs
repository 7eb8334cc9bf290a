use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::commerce::{coupon, order_coupon, Coupon as CouponEntity, OrderCoupon};
use crate::errors::ServiceError;
use crate::models::cart::CartItem;
use crate::models::coupon::Coupon;

/// Why a coupon cannot be used. The display text is shown to the shopper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("Invalid coupon code")]
    NotFound,
    #[error("Coupon is not active")]
    Inactive,
    #[error("Coupon is not yet valid")]
    NotYetValid,
    #[error("Coupon has expired")]
    Expired,
    #[error("Coupon usage limit has been reached")]
    UsageLimitReached,
    #[error("You have already used this coupon the maximum number of times")]
    PerUserLimitReached,
    #[error("Minimum order value of {0} required")]
    BelowMinimumOrderValue(Decimal),
    #[error("Coupon is not applicable to items in your cart")]
    NotApplicable,
}

impl From<CouponRejection> for ServiceError {
    fn from(rejection: CouponRejection) -> Self {
        ServiceError::CouponRejected(rejection.to_string())
    }
}

/// Checks a coupon against a cart, in a fixed order so the first failing
/// rule is the one reported.
pub fn evaluate(
    coupon: &Coupon,
    prior_uses: u64,
    subtotal: Decimal,
    items: &[CartItem],
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if !coupon.has_started(now) {
        return Err(CouponRejection::NotYetValid);
    }
    if coupon.is_expired(now) {
        return Err(CouponRejection::Expired);
    }
    if coupon.usage_remaining() == Some(0) {
        return Err(CouponRejection::UsageLimitReached);
    }
    if let Some(limit) = coupon.per_user_limit {
        if prior_uses >= limit.max(0) as u64 {
            return Err(CouponRejection::PerUserLimitReached);
        }
    }
    if subtotal < coupon.minimum_order_value {
        return Err(CouponRejection::BelowMinimumOrderValue(
            coupon.minimum_order_value.normalize(),
        ));
    }
    if coupon.has_restrictions() && !items.iter().any(|item| applies_to(coupon, item)) {
        return Err(CouponRejection::NotApplicable);
    }
    Ok(())
}

fn applies_to(coupon: &Coupon, item: &CartItem) -> bool {
    coupon.applicable_products.contains(&item.product_id)
        || coupon
            .applicable_categories
            .iter()
            .any(|category| category.eq_ignore_ascii_case(&item.category))
}

/// Coupon storage as seen by the cart and checkout flows
#[async_trait]
pub trait CouponCatalog: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, ServiceError>;

    /// Orders this user has already redeemed the code on
    async fn count_user_redemptions(&self, code: &str, user_id: Uuid) -> Result<u64, ServiceError>;

    /// Bumps the global usage counter. Returns false when the coupon was
    /// exhausted concurrently and the increment did not apply.
    async fn increment_usage(&self, code: &str) -> Result<bool, ServiceError>;
}

#[derive(Clone)]
pub struct DbCouponCatalog {
    db: Arc<DatabaseConnection>,
}

impl DbCouponCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CouponCatalog for DbCouponCatalog {
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, ServiceError> {
        CouponEntity::find()
            .filter(coupon::Column::CouponCode.eq(Coupon::normalize_code(code)))
            .one(&*self.db)
            .await?
            .map(Coupon::try_from)
            .transpose()
    }

    async fn count_user_redemptions(&self, code: &str, user_id: Uuid) -> Result<u64, ServiceError> {
        let count = OrderCoupon::find()
            .filter(order_coupon::Column::CouponCode.eq(Coupon::normalize_code(code)))
            .filter(order_coupon::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await?;
        Ok(count)
    }

    async fn increment_usage(&self, code: &str) -> Result<bool, ServiceError> {
        let result = CouponEntity::update_many()
            .col_expr(
                coupon::Column::CurrentUsage,
                Expr::col(coupon::Column::CurrentUsage).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::CouponCode.eq(Coupon::normalize_code(code)))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::CurrentUsage)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }
}

/// Looks coupons up and runs the rule set against a cart.
#[derive(Clone)]
pub struct CouponEvaluator {
    catalog: Arc<dyn CouponCatalog>,
}

impl CouponEvaluator {
    pub fn new(catalog: Arc<dyn CouponCatalog>) -> Self {
        Self { catalog }
    }

    #[instrument(skip(self, items))]
    pub async fn validate(
        &self,
        code: &str,
        user_id: Uuid,
        subtotal: Decimal,
        items: &[CartItem],
        now: DateTime<Utc>,
    ) -> Result<Coupon, ServiceError> {
        let coupon = self
            .catalog
            .find_by_code(code)
            .await?
            .ok_or(CouponRejection::NotFound)?;

        let prior_uses = match coupon.per_user_limit {
            Some(_) => self.catalog.count_user_redemptions(code, user_id).await?,
            None => 0,
        };

        if let Err(rejection) = evaluate(&coupon, prior_uses, subtotal, items, now) {
            debug!(code = %coupon.coupon_code, %rejection, "coupon rejected");
            counter!("settlement.coupons.rejected", 1);
            return Err(rejection.into());
        }
        Ok(coupon)
    }

    /// Called once per code after an order is durable. A lost race against
    /// the global limit is logged, not surfaced.
    pub async fn record_redemption(&self, code: &str) {
        match self.catalog.increment_usage(code).await {
            Ok(true) => counter!("settlement.coupons.redeemed", 1),
            Ok(false) => warn!(code, "coupon usage limit reached before increment"),
            Err(e) => warn!(code, error = %e, "failed to increment coupon usage"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::commerce::pricing::PromoType;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn coupon(now: DateTime<Utc>) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            coupon_code: "SAVE10".into(),
            promo_type: PromoType::Percentage,
            discount_value: dec!(10),
            usage_limit: None,
            per_user_limit: None,
            current_usage: 0,
            minimum_order_value: Decimal::ZERO,
            applicable_categories: vec![],
            applicable_products: vec![],
            start_date_time: now - Duration::days(1),
            end_date_time: now + Duration::days(1),
            is_active: true,
        }
    }

    fn item(category: &str) -> CartItem {
        CartItem {
            product_id: Uuid::new_v4(),
            variant_id: None,
            name: "Blender".into(),
            category: category.into(),
            unit_price: dec!(1000),
            quantity: 1,
            max_quantity: 5,
            line_total: dec!(1000),
        }
    }

    #[test]
    fn valid_coupon_passes() {
        let now = Utc::now();
        assert!(evaluate(&coupon(now), 0, dec!(1000), &[item("kitchen")], now).is_ok());
    }

    #[test]
    fn inactive_is_reported_before_expiry() {
        let now = Utc::now();
        let mut c = coupon(now);
        c.is_active = false;
        c.end_date_time = now - Duration::hours(1);
        assert_eq!(
            evaluate(&c, 0, dec!(1000), &[], now),
            Err(CouponRejection::Inactive)
        );
    }

    #[test]
    fn window_is_start_inclusive_end_exclusive() {
        let now = Utc::now();
        let mut c = coupon(now);
        c.start_date_time = now;
        c.end_date_time = now + Duration::seconds(1);
        assert!(evaluate(&c, 0, dec!(1), &[], now).is_ok());
        assert_eq!(
            evaluate(&c, 0, dec!(1), &[], c.end_date_time),
            Err(CouponRejection::Expired)
        );
        assert_eq!(
            evaluate(&c, 0, dec!(1), &[], now - Duration::seconds(1)),
            Err(CouponRejection::NotYetValid)
        );
    }

    #[test]
    fn usage_limits() {
        let now = Utc::now();
        let mut c = coupon(now);
        c.usage_limit = Some(3);
        c.current_usage = 3;
        assert_eq!(
            evaluate(&c, 0, dec!(1), &[], now),
            Err(CouponRejection::UsageLimitReached)
        );

        c.current_usage = 0;
        c.per_user_limit = Some(1);
        assert_eq!(
            evaluate(&c, 1, dec!(1), &[], now),
            Err(CouponRejection::PerUserLimitReached)
        );
        assert!(evaluate(&c, 0, dec!(1), &[], now).is_ok());
    }

    #[test]
    fn minimum_order_value_message() {
        let now = Utc::now();
        let mut c = coupon(now);
        c.minimum_order_value = dec!(5000.0000);
        let err = evaluate(&c, 0, dec!(4999.99), &[], now).unwrap_err();
        assert_eq!(err.to_string(), "Minimum order value of 5000 required");
    }

    #[test]
    fn restricted_coupon_needs_a_matching_item() {
        let now = Utc::now();
        let mut c = coupon(now);
        c.applicable_categories = vec!["Kitchen".into()];
        assert_eq!(
            evaluate(&c, 0, dec!(1000), &[item("garden")], now),
            Err(CouponRejection::NotApplicable)
        );
        assert!(evaluate(&c, 0, dec!(1000), &[item("garden"), item("kitchen")], now).is_ok());

        let target = item("garden");
        c.applicable_categories.clear();
        c.applicable_products = vec![target.product_id];
        assert!(evaluate(&c, 0, dec!(1000), &[target], now).is_ok());
    }

    #[derive(Default)]
    struct InMemoryCoupons {
        coupons: Mutex<HashMap<String, Coupon>>,
        redemptions: u64,
    }

    #[async_trait]
    impl CouponCatalog for InMemoryCoupons {
        async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, ServiceError> {
            Ok(self
                .coupons
                .lock()
                .unwrap()
                .get(&Coupon::normalize_code(code))
                .cloned())
        }

        async fn count_user_redemptions(&self, _: &str, _: Uuid) -> Result<u64, ServiceError> {
            Ok(self.redemptions)
        }

        async fn increment_usage(&self, code: &str) -> Result<bool, ServiceError> {
            let mut coupons = self.coupons.lock().unwrap();
            let Some(c) = coupons.get_mut(code) else {
                return Ok(false);
            };
            if c.usage_remaining() == Some(0) {
                return Ok(false);
            }
            c.current_usage += 1;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn unknown_code_is_invalid() {
        let evaluator = CouponEvaluator::new(Arc::new(InMemoryCoupons::default()));
        let err = evaluator
            .validate("NOPE", Uuid::new_v4(), dec!(100), &[], Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid coupon code");
    }

    #[tokio::test]
    async fn per_user_limit_uses_redemption_count() {
        let now = Utc::now();
        let mut c = coupon(now);
        c.per_user_limit = Some(2);
        let catalog = InMemoryCoupons {
            coupons: Mutex::new(HashMap::from([("SAVE10".to_string(), c)])),
            redemptions: 2,
        };
        let evaluator = CouponEvaluator::new(Arc::new(catalog));
        let err = evaluator
            .validate("save10", Uuid::new_v4(), dec!(100), &[], now)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "You have already used this coupon the maximum number of times"
        );
    }
}
