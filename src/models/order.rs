use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, IntoActiveModel};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::commerce::order::{
    self, DeliveryMethod, OrderStatus, PaymentMethod, PaymentStatus,
};
use crate::errors::ServiceError;
use crate::models::cart::{AppliedCoupon, CartItem};
use crate::services::commerce::pricing::{self, PricedLine};

const RETURN_WINDOW_DAYS: i64 = 7;
const ESTIMATED_DELIVERY_DAYS: i64 = 3;

/// Frozen line of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub category: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

impl From<&CartItem> for OrderItem {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id,
            variant_id: item.variant_id,
            name: item.name.clone(),
            category: item.category.clone(),
            unit_price: item.unit_price,
            quantity: item.quantity,
            line_total: item.line_total,
        }
    }
}

impl PricedLine for OrderItem {
    fn unit_price(&self) -> Decimal {
        self.unit_price
    }
    fn quantity(&self) -> i32 {
        self.quantity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub note: String,
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Order cannot be cancelled in status {0}")]
    CannotCancel(OrderStatus),
    #[error("Order cannot transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Return window has closed or order was not delivered")]
    CannotReturn,
    #[error("Only delivered orders can be rated")]
    CannotRate,
    #[error("Rating must be between 1 and 5")]
    InvalidRating,
    #[error("Payment cannot be retried in payment status {0}")]
    CannotRetryPayment(PaymentStatus),
}

impl From<OrderError> for ServiceError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidRating => ServiceError::ValidationError(err.to_string()),
            _ => ServiceError::InvalidOperation(err.to_string()),
        }
    }
}

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Payment had completed, so the money goes back instead
    Refunded,
}

/// Fields captured at checkout
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub applied_coupons: Vec<AppliedCoupon>,
    pub shipping_address_id: Uuid,
    pub delivery_method: DeliveryMethod,
    pub payment_method: PaymentMethod,
    pub delivery_fee: Decimal,
    pub service_charge: Decimal,
    pub tax_rate: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub order_slug: String,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub shipping_address_id: Uuid,
    pub delivery_method: DeliveryMethod,
    pub order_status: OrderStatus,
    pub payment: PaymentInfo,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub service_charge: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub applied_coupons: Vec<AppliedCoupon>,
    pub status_history: Vec<StatusHistoryEntry>,
    pub notes: Option<String>,
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub actual_delivery: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub return_reason: Option<String>,
    pub return_requested_at: Option<DateTime<Utc>>,
    pub refund_amount: Option<Decimal>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub rating: Option<i32>,
    pub review: Option<String>,
    #[serde(skip)]
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `ORD-YYYYMMDD-XXXXXX`
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

/// Random lowercase slug safe for URLs
pub fn generate_order_slug() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

impl Order {
    pub fn place(input: NewOrder, now: DateTime<Utc>) -> Self {
        let mut order = Self {
            id: Uuid::new_v4(),
            order_number: generate_order_number(now),
            order_slug: generate_order_slug(),
            user_id: input.user_id,
            items: input.items,
            shipping_address_id: input.shipping_address_id,
            delivery_method: input.delivery_method,
            order_status: OrderStatus::Pending,
            payment: PaymentInfo {
                method: input.payment_method,
                status: PaymentStatus::Pending,
                reference: None,
                transaction_id: None,
                amount: Decimal::ZERO,
                paid_at: None,
            },
            subtotal: Decimal::ZERO,
            delivery_fee: input.delivery_fee,
            service_charge: input.service_charge,
            tax: Decimal::ZERO,
            discount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            applied_coupons: input.applied_coupons,
            status_history: Vec::new(),
            notes: input.notes,
            tracking_number: None,
            estimated_delivery: None,
            actual_delivery: None,
            cancellation_reason: None,
            cancelled_at: None,
            return_reason: None,
            return_requested_at: None,
            refund_amount: None,
            refunded_at: None,
            rating: None,
            review: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        order.recompute_totals();
        order.tax = pricing::round_money((order.subtotal - order.discount) * input.tax_rate);
        order.prepare_for_save(now);
        order.payment.amount = order.total_amount;
        order
    }

    /// Fresh identifiers after a unique-index collision on insert.
    pub fn regenerate_identifiers(&mut self) {
        self.order_number = generate_order_number(self.created_at);
        self.order_slug = generate_order_slug();
    }

    /// Re-derives totals from the frozen item snapshot.
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
        self.total_amount = pricing::round_money(
            (self.subtotal + self.delivery_fee + self.service_charge + self.tax - self.discount)
                .max(Decimal::ZERO),
        );
    }

    /// Runs before every write: totals are recomputed and a brand-new order
    /// gets its initial history entry.
    pub fn prepare_for_save(&mut self, now: DateTime<Utc>) {
        self.recompute_totals();
        if self.status_history.is_empty() {
            self.status_history.push(StatusHistoryEntry {
                status: OrderStatus::Pending,
                timestamp: now,
                note: "Order created".to_string(),
                updated_by: None,
            });
        }
        self.updated_at = now;
    }

    fn record(&mut self, status: OrderStatus, note: impl Into<String>, by: Option<&str>, now: DateTime<Utc>) {
        self.order_status = status;
        self.status_history.push(StatusHistoryEntry {
            status,
            timestamp: now,
            note: note.into(),
            updated_by: by.map(str::to_string),
        });
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self.order_status,
            OrderStatus::Pending | OrderStatus::Confirmed
        ) && self.payment.status != PaymentStatus::Completed
    }

    pub fn can_return(&self, now: DateTime<Utc>) -> bool {
        self.order_status == OrderStatus::Delivered
            && self
                .actual_delivery
                .map_or(false, |at| now - at <= Duration::days(RETURN_WINDOW_DAYS))
    }

    /// pending → confirmed
    pub fn confirm(&mut self, note: &str, by: Option<&str>, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.order_status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                from: self.order_status,
                to: OrderStatus::Confirmed,
            });
        }
        self.record(OrderStatus::Confirmed, note, by, now);
        Ok(())
    }

    /// Stamps a settled payment onto the order
    pub fn mark_paid(
        &mut self,
        transaction_id: Option<String>,
        reference: &str,
        amount: Decimal,
        paid_at: DateTime<Utc>,
    ) {
        self.payment.status = PaymentStatus::Completed;
        self.payment.transaction_id = transaction_id;
        self.payment.reference = Some(reference.to_string());
        self.payment.amount = amount;
        self.payment.paid_at = Some(paid_at);
    }

    /// confirmed → processing
    pub fn start_processing(&mut self, by: Option<&str>, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.order_status != OrderStatus::Confirmed {
            return Err(OrderError::InvalidTransition {
                from: self.order_status,
                to: OrderStatus::Processing,
            });
        }
        self.record(OrderStatus::Processing, "Order is being processed", by, now);
        Ok(())
    }

    /// confirmed/processing → shipped
    pub fn ship(
        &mut self,
        tracking_number: Option<String>,
        by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if !matches!(
            self.order_status,
            OrderStatus::Confirmed | OrderStatus::Processing
        ) {
            return Err(OrderError::InvalidTransition {
                from: self.order_status,
                to: OrderStatus::Shipped,
            });
        }
        if tracking_number.is_some() {
            self.tracking_number = tracking_number;
        }
        if self.estimated_delivery.is_none() {
            self.estimated_delivery = Some(now + Duration::days(ESTIMATED_DELIVERY_DAYS));
        }
        self.record(OrderStatus::Shipped, "Order shipped", by, now);
        Ok(())
    }

    /// any non-terminal → delivered
    pub fn deliver(&mut self, by: Option<&str>, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.order_status.is_terminal() {
            return Err(OrderError::InvalidTransition {
                from: self.order_status,
                to: OrderStatus::Delivered,
            });
        }
        if self.actual_delivery.is_none() {
            self.actual_delivery = Some(now);
        }
        if self.payment.method == PaymentMethod::CashOnDelivery
            && self.payment.status == PaymentStatus::Pending
        {
            self.payment.status = PaymentStatus::Completed;
            self.payment.paid_at = Some(now);
        }
        self.record(OrderStatus::Delivered, "Order delivered", by, now);
        Ok(())
    }

    /// Customer or admin cancellation. A paid order is refunded instead.
    pub fn cancel(
        &mut self,
        reason: Option<String>,
        by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, OrderError> {
        if !matches!(
            self.order_status,
            OrderStatus::Pending | OrderStatus::Confirmed
        ) {
            return Err(OrderError::CannotCancel(self.order_status));
        }

        self.cancellation_reason = reason;
        self.cancelled_at = Some(now);

        if self.can_cancel() {
            if self.payment.status == PaymentStatus::Pending {
                self.payment.status = PaymentStatus::Cancelled;
            }
            self.record(OrderStatus::Cancelled, "Order cancelled", by, now);
            Ok(CancelOutcome::Cancelled)
        } else {
            self.apply_refund(now);
            self.record(
                OrderStatus::Cancelled,
                "Order cancelled; payment refunded",
                by,
                now,
            );
            Ok(CancelOutcome::Refunded)
        }
    }

    /// Cascade from a failed payment: pending → cancelled, payment failed.
    pub fn fail_payment(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.order_status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                from: self.order_status,
                to: OrderStatus::Cancelled,
            });
        }
        self.payment.status = PaymentStatus::Failed;
        self.cancellation_reason = Some(reason.to_string());
        self.cancelled_at = Some(now);
        self.record(
            OrderStatus::Cancelled,
            format!("Payment failed: {}", reason),
            Some("system"),
            now,
        );
        Ok(())
    }

    /// Provider could not start the payment; the order stays pending so the
    /// customer can retry.
    pub fn mark_payment_initialization_failed(&mut self) {
        self.payment.status = PaymentStatus::Failed;
    }

    /// Re-opens a payment whose initialization failed.
    pub fn reopen_payment(&mut self) -> Result<(), OrderError> {
        if self.order_status != OrderStatus::Pending || self.payment.status != PaymentStatus::Failed
        {
            return Err(OrderError::CannotRetryPayment(self.payment.status));
        }
        self.payment.status = PaymentStatus::Pending;
        Ok(())
    }

    /// delivered → returned
    pub fn request_return(
        &mut self,
        reason: String,
        by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if !self.can_return(now) {
            return Err(OrderError::CannotReturn);
        }
        self.return_reason = Some(reason);
        self.return_requested_at = Some(now);
        self.record(OrderStatus::Returned, "Return requested", by, now);
        Ok(())
    }

    /// confirmed/processing/shipped/delivered → refunded
    pub fn refund(&mut self, by: Option<&str>, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !matches!(
            self.order_status,
            OrderStatus::Confirmed
                | OrderStatus::Processing
                | OrderStatus::Shipped
                | OrderStatus::Delivered
                | OrderStatus::Returned
        ) {
            return Err(OrderError::InvalidTransition {
                from: self.order_status,
                to: OrderStatus::Refunded,
            });
        }
        self.apply_refund(now);
        self.record(OrderStatus::Refunded, "Order refunded", by, now);
        Ok(())
    }

    fn apply_refund(&mut self, now: DateTime<Utc>) {
        self.payment.status = PaymentStatus::Refunded;
        self.refund_amount = Some(self.total_amount);
        self.refunded_at = Some(now);
    }

    /// Attaches a rating; not a status transition, so history is untouched.
    pub fn rate(&mut self, rating: i32, review: Option<String>) -> Result<(), OrderError> {
        if self.order_status != OrderStatus::Delivered {
            return Err(OrderError::CannotRate);
        }
        if !(1..=5).contains(&rating) {
            return Err(OrderError::InvalidRating);
        }
        self.rating = Some(rating);
        self.review = review;
        Ok(())
    }

    /// Every column is `Set`, so the same model serves inserts and
    /// version-guarded `update_many` writes.
    pub fn to_active_model(&self) -> Result<order::ActiveModel, ServiceError> {
        Ok(order::Model {
            id: self.id,
            order_number: self.order_number.clone(),
            order_slug: self.order_slug.clone(),
            user_id: self.user_id,
            items: serde_json::to_value(&self.items)?,
            shipping_address_id: self.shipping_address_id,
            delivery_method: self.delivery_method,
            order_status: self.order_status,
            payment_method: self.payment.method,
            payment_status: self.payment.status,
            payment_reference: self.payment.reference.clone(),
            transaction_id: self.payment.transaction_id.clone(),
            payment_amount: self.payment.amount,
            paid_at: self.payment.paid_at,
            refund_amount: self.refund_amount,
            refunded_at: self.refunded_at,
            subtotal: self.subtotal,
            delivery_fee: self.delivery_fee,
            service_charge: self.service_charge,
            tax: self.tax,
            discount: self.discount,
            total_amount: self.total_amount,
            applied_coupons: serde_json::to_value(&self.applied_coupons)?,
            status_history: serde_json::to_value(&self.status_history)?,
            notes: self.notes.clone(),
            tracking_number: self.tracking_number.clone(),
            estimated_delivery: self.estimated_delivery,
            actual_delivery: self.actual_delivery,
            cancellation_reason: self.cancellation_reason.clone(),
            cancelled_at: self.cancelled_at,
            return_reason: self.return_reason.clone(),
            return_requested_at: self.return_requested_at,
            rating: self.rating,
            review: self.review.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_active_model()
        .reset_all())
    }
}

impl TryFrom<order::Model> for Order {
    type Error = ServiceError;

    fn try_from(model: order::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            order_number: model.order_number,
            order_slug: model.order_slug,
            user_id: model.user_id,
            items: serde_json::from_value(model.items)?,
            shipping_address_id: model.shipping_address_id,
            delivery_method: model.delivery_method,
            order_status: model.order_status,
            payment: PaymentInfo {
                method: model.payment_method,
                status: model.payment_status,
                reference: model.payment_reference,
                transaction_id: model.transaction_id,
                amount: pricing::round_money(model.payment_amount),
                paid_at: model.paid_at,
            },
            subtotal: pricing::round_money(model.subtotal),
            delivery_fee: pricing::round_money(model.delivery_fee),
            service_charge: pricing::round_money(model.service_charge),
            tax: pricing::round_money(model.tax),
            discount: pricing::round_money(model.discount),
            total_amount: pricing::round_money(model.total_amount),
            applied_coupons: serde_json::from_value(model.applied_coupons)?,
            status_history: serde_json::from_value(model.status_history)?,
            notes: model.notes,
            tracking_number: model.tracking_number,
            estimated_delivery: model.estimated_delivery,
            actual_delivery: model.actual_delivery,
            cancellation_reason: model.cancellation_reason,
            cancelled_at: model.cancelled_at,
            return_reason: model.return_reason,
            return_requested_at: model.return_requested_at,
            refund_amount: model.refund_amount.map(pricing::round_money),
            refunded_at: model.refunded_at,
            rating: model.rating,
            review: model.review,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_order(method: PaymentMethod) -> Order {
        let now = Utc::now();
        Order::place(
            NewOrder {
                user_id: Uuid::new_v4(),
                items: vec![OrderItem {
                    product_id: Uuid::new_v4(),
                    variant_id: None,
                    name: "Kettle".into(),
                    category: "kitchen".into(),
                    unit_price: dec!(1000),
                    quantity: 2,
                    line_total: Decimal::ZERO,
                }],
                applied_coupons: vec![],
                shipping_address_id: Uuid::new_v4(),
                delivery_method: DeliveryMethod::Standard,
                payment_method: method,
                delivery_fee: dec!(1500),
                service_charge: dec!(30),
                tax_rate: dec!(0.075),
                notes: None,
            },
            now,
        )
    }

    #[test]
    fn placed_order_is_priced_and_seeded() {
        let order = new_order(PaymentMethod::Paystack);
        assert_eq!(order.subtotal, dec!(2000));
        assert_eq!(order.tax, dec!(150));
        assert_eq!(order.total_amount, dec!(3680));
        assert_eq!(order.payment.amount, dec!(3680));
        assert_eq!(order.status_history.len(), 1);
        assert_eq!(order.status_history[0].note, "Order created");
        assert!(order.order_number.starts_with("ORD-"));
        assert_eq!(order.order_number.len(), "ORD-20240101-ABC123".len());
    }

    #[test]
    fn tampered_totals_are_recomputed_on_save() {
        let mut order = new_order(PaymentMethod::Paystack);
        order.total_amount = dec!(1);
        order.prepare_for_save(Utc::now());
        assert_eq!(order.total_amount, dec!(3680));
        assert_eq!(order.status_history.len(), 1);
    }

    #[test]
    fn shipping_sets_estimated_delivery_once() {
        let mut order = new_order(PaymentMethod::Paystack);
        let now = Utc::now();
        order.confirm("Payment confirmed", None, now).unwrap();
        order.ship(Some("TRK1".into()), Some("admin"), now).unwrap();
        assert_eq!(order.estimated_delivery, Some(now + Duration::days(3)));
        assert_eq!(order.status_history.len(), 3);
    }

    #[test]
    fn cancel_unpaid_order() {
        let mut order = new_order(PaymentMethod::Paystack);
        let outcome = order.cancel(Some("changed mind".into()), None, Utc::now()).unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert_eq!(order.order_status, OrderStatus::Cancelled);
        assert_eq!(order.payment.status, PaymentStatus::Cancelled);
    }

    #[test]
    fn cancel_paid_order_refunds() {
        let mut order = new_order(PaymentMethod::Paystack);
        let now = Utc::now();
        order.mark_paid(Some("tx".into()), "PAY_1", order.total_amount, now);
        order.confirm("Payment confirmed", None, now).unwrap();
        assert!(!order.can_cancel());

        let outcome = order.cancel(None, None, now).unwrap();
        assert_eq!(outcome, CancelOutcome::Refunded);
        assert_eq!(order.payment.status, PaymentStatus::Refunded);
        assert_eq!(order.refund_amount, Some(order.total_amount));
    }

    #[test]
    fn shipped_order_cannot_be_cancelled() {
        let mut order = new_order(PaymentMethod::Paystack);
        let now = Utc::now();
        order.confirm("ok", None, now).unwrap();
        order.ship(None, None, now).unwrap();
        assert_eq!(
            order.cancel(None, None, now).unwrap_err(),
            OrderError::CannotCancel(OrderStatus::Shipped)
        );
    }

    #[test]
    fn return_window_is_seven_days() {
        let mut order = new_order(PaymentMethod::CashOnDelivery);
        let delivered_at = Utc::now() - Duration::days(8);
        order.confirm("ok", None, delivered_at).unwrap();
        order.deliver(None, delivered_at).unwrap();
        assert_eq!(order.payment.status, PaymentStatus::Completed);
        assert!(!order.can_return(Utc::now()));
        assert!(order.can_return(delivered_at + Duration::days(6)));
    }

    #[test]
    fn rating_requires_delivery_and_range() {
        let mut order = new_order(PaymentMethod::Paystack);
        assert_eq!(order.rate(5, None).unwrap_err(), OrderError::CannotRate);

        let now = Utc::now();
        order.confirm("ok", None, now).unwrap();
        order.deliver(None, now).unwrap();
        let history_len = order.status_history.len();
        assert_eq!(order.rate(6, None).unwrap_err(), OrderError::InvalidRating);
        order.rate(4, Some("good".into())).unwrap();
        assert_eq!(order.rating, Some(4));
        assert_eq!(order.status_history.len(), history_len);
    }

    #[test]
    fn payment_failure_cancels_pending_order() {
        let mut order = new_order(PaymentMethod::Opay);
        order.fail_payment("declined", Utc::now()).unwrap();
        assert_eq!(order.order_status, OrderStatus::Cancelled);
        assert_eq!(order.payment.status, PaymentStatus::Failed);
        assert!(order.fail_payment("declined", Utc::now()).is_err());
    }

    #[test]
    fn only_failed_initializations_can_be_reopened() {
        let mut order = new_order(PaymentMethod::Palmpay);
        assert!(order.reopen_payment().is_err());
        order.mark_payment_initialization_failed();
        order.reopen_payment().unwrap();
        assert_eq!(order.payment.status, PaymentStatus::Pending);
    }
}
