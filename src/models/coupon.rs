use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::commerce::coupon;
use crate::errors::ServiceError;
use crate::services::commerce::pricing::PromoType;

/// Coupon definition as read from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub coupon_code: String,
    pub promo_type: PromoType,
    pub discount_value: Decimal,
    pub usage_limit: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub current_usage: i32,
    pub minimum_order_value: Decimal,
    pub applicable_categories: Vec<String>,
    pub applicable_products: Vec<Uuid>,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub is_active: bool,
}

impl Coupon {
    /// Coupon codes are case-insensitive and stored uppercase.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_ascii_uppercase()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_date_time
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_date_time
    }

    /// `None` when the coupon has no global cap
    pub fn usage_remaining(&self) -> Option<i32> {
        self.usage_limit
            .map(|limit| (limit - self.current_usage).max(0))
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.has_started(now)
            && !self.is_expired(now)
            && self.usage_remaining().map_or(true, |left| left > 0)
    }

    pub fn has_restrictions(&self) -> bool {
        !self.applicable_categories.is_empty() || !self.applicable_products.is_empty()
    }
}

impl TryFrom<coupon::Model> for Coupon {
    type Error = ServiceError;

    fn try_from(model: coupon::Model) -> Result<Self, Self::Error> {
        let applicable_categories: Vec<String> =
            serde_json::from_value(model.applicable_categories)?;
        let applicable_products: Vec<Uuid> = serde_json::from_value(model.applicable_products)?;

        Ok(Self {
            id: model.id,
            coupon_code: model.coupon_code,
            promo_type: PromoType::parse(&model.promo_type),
            discount_value: model.discount_value,
            usage_limit: model.usage_limit,
            per_user_limit: model.per_user_limit,
            current_usage: model.current_usage,
            minimum_order_value: model.minimum_order_value,
            applicable_categories,
            applicable_products,
            start_date_time: model.start_date_time,
            end_date_time: model.end_date_time,
            is_active: model.is_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon(now: DateTime<Utc>) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            coupon_code: "SAVE10".into(),
            promo_type: PromoType::Percentage,
            discount_value: dec!(10),
            usage_limit: Some(5),
            per_user_limit: None,
            current_usage: 5,
            minimum_order_value: Decimal::ZERO,
            applicable_categories: vec![],
            applicable_products: vec![],
            start_date_time: now - Duration::days(1),
            end_date_time: now + Duration::days(1),
            is_active: true,
        }
    }

    #[test]
    fn exhausted_coupon_is_unavailable() {
        let now = Utc::now();
        let c = coupon(now);
        assert_eq!(c.usage_remaining(), Some(0));
        assert!(!c.is_available(now));
    }

    #[test]
    fn end_boundary_is_exclusive() {
        let now = Utc::now();
        let c = coupon(now);
        assert!(c.is_expired(c.end_date_time));
        assert!(!c.is_expired(c.end_date_time - Duration::seconds(1)));
    }

    #[test]
    fn codes_are_normalized() {
        assert_eq!(Coupon::normalize_code("  save10 "), "SAVE10");
    }
}
