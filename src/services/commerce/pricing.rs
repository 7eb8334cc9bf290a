//! Pure price computation shared by carts and orders.
//!
//! Nothing in here touches storage or the clock; callers feed the current
//! lines and coupons and write the returned figures back onto their
//! aggregate before persisting it.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Discount semantics of a coupon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PromoType {
    Percentage,
    Fixed,
}

impl PromoType {
    /// Parses a stored promo type. Unknown values fall back to percentage.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fixed" | "fixed_amount" | "flat" => PromoType::Fixed,
            "percentage" | "percent" => PromoType::Percentage,
            other => {
                warn!(promo_type = other, "unknown promo type, treating as percentage");
                PromoType::Percentage
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromoType::Percentage => "percentage",
            PromoType::Fixed => "fixed",
        }
    }
}

/// A line that contributes to the subtotal
pub trait PricedLine {
    fn unit_price(&self) -> Decimal;
    fn quantity(&self) -> i32;
}

/// A coupon as seen by the engine
pub trait DiscountRule {
    fn promo_type(&self) -> PromoType;
    fn discount_value(&self) -> Decimal;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Totals {
    /// One entry per input line, in order
    pub line_totals: Vec<Decimal>,
    /// One entry per input coupon, in application order
    pub coupon_discounts: Vec<Decimal>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
}

/// Money is kept at two decimal places, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    round_money(unit_price * Decimal::from(quantity.max(0)))
}

/// Discount a single coupon grants against `subtotal`, given what earlier
/// coupons already took. Never exceeds what is left of the subtotal.
pub fn coupon_discount(
    promo_type: PromoType,
    discount_value: Decimal,
    subtotal: Decimal,
    already_discounted: Decimal,
) -> Decimal {
    let remaining = (subtotal - already_discounted).max(Decimal::ZERO);
    let value = discount_value.max(Decimal::ZERO);
    let raw = match promo_type {
        PromoType::Percentage => subtotal * value / Decimal::ONE_HUNDRED,
        PromoType::Fixed => value,
    };
    round_money(raw.min(remaining))
}

/// Computes line totals, per-coupon discounts and the grand total.
///
/// `total_amount = max(0, subtotal + delivery_fee + service_charge - discount)`
pub fn compute_totals<L, C>(
    items: &[L],
    coupons: &[C],
    delivery_fee: Decimal,
    service_charge: Decimal,
) -> Totals
where
    L: PricedLine,
    C: DiscountRule,
{
    let line_totals: Vec<Decimal> = items
        .iter()
        .map(|line| line_total(line.unit_price(), line.quantity()))
        .collect();
    let subtotal: Decimal = line_totals.iter().copied().sum();

    let mut discount = Decimal::ZERO;
    let mut coupon_discounts = Vec::with_capacity(coupons.len());
    for coupon in coupons {
        let amount = coupon_discount(
            coupon.promo_type(),
            coupon.discount_value(),
            subtotal,
            discount,
        );
        discount += amount;
        coupon_discounts.push(amount);
    }

    let total_amount = round_money(
        (subtotal + delivery_fee + service_charge - discount).max(Decimal::ZERO),
    );

    Totals {
        line_totals,
        coupon_discounts,
        subtotal,
        discount,
        total_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct Line(Decimal, i32);

    impl PricedLine for Line {
        fn unit_price(&self) -> Decimal {
            self.0
        }
        fn quantity(&self) -> i32 {
            self.1
        }
    }

    struct Rule(PromoType, Decimal);

    impl DiscountRule for Rule {
        fn promo_type(&self) -> PromoType {
            self.0
        }
        fn discount_value(&self) -> Decimal {
            self.1
        }
    }

    #[test]
    fn subtotal_and_percentage_coupon() {
        let items = [Line(dec!(1000), 2), Line(dec!(500), 1)];
        let coupons = [Rule(PromoType::Percentage, dec!(10))];
        let totals = compute_totals(&items, &coupons, dec!(1500), dec!(37.5));

        assert_eq!(totals.line_totals, vec![dec!(2000), dec!(500)]);
        assert_eq!(totals.subtotal, dec!(2500));
        assert_eq!(totals.discount, dec!(250));
        assert_eq!(totals.total_amount, dec!(3787.5));
    }

    #[test]
    fn stacked_fixed_coupons_never_exceed_subtotal() {
        let items = [Line(dec!(300), 1)];
        let coupons = [
            Rule(PromoType::Fixed, dec!(200)),
            Rule(PromoType::Fixed, dec!(200)),
        ];
        let totals = compute_totals(&items, &coupons, Decimal::ZERO, Decimal::ZERO);

        assert_eq!(totals.coupon_discounts, vec![dec!(200), dec!(100)]);
        assert_eq!(totals.discount, dec!(300));
        assert_eq!(totals.total_amount, Decimal::ZERO);
    }

    #[test]
    fn percentage_is_clamped_to_subtotal() {
        let items = [Line(dec!(80), 1)];
        let coupons = [Rule(PromoType::Percentage, dec!(150))];
        let totals = compute_totals(&items, &coupons, dec!(10), Decimal::ZERO);

        assert_eq!(totals.discount, dec!(80));
        assert_eq!(totals.total_amount, dec!(10));
    }

    #[test]
    fn empty_cart_totals_to_fees_only() {
        let items: [Line; 0] = [];
        let coupons: [Rule; 0] = [];
        let totals = compute_totals(&items, &coupons, dec!(1500), Decimal::ZERO);
        assert_eq!(totals.subtotal, Decimal::ZERO);
        assert_eq!(totals.total_amount, dec!(1500));
    }

    #[test]
    fn unknown_promo_type_is_percentage() {
        assert_eq!(PromoType::parse("bogus"), PromoType::Percentage);
        assert_eq!(PromoType::parse("FIXED"), PromoType::Fixed);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_money(dec!(0.125)), dec!(0.13));
        assert_eq!(round_money(dec!(2.004)), dec!(2.00));
    }
}
