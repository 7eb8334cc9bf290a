//! Outbound "something happened to an order" calls.
//!
//! Delivery (push, email, sockets) lives elsewhere; services only need a
//! fire-and-forget contract that never fails the operation that triggered it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::entities::commerce::order::OrderStatus;
use crate::events::{Event, EventSender};
use crate::models::order::Order;

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn order_placed(&self, order: &Order);
    async fn order_confirmed(&self, order: &Order, transaction_ref: Option<&str>);
    async fn order_cancelled(&self, order: &Order, refunded: bool);
    async fn order_status_changed(&self, order: &Order, old_status: OrderStatus);
    async fn payment_failed(&self, transaction_ref: &str, order_ids: &[Uuid], reason: &str);
}

/// Publishes notifications onto the in-process event channel.
#[derive(Debug, Clone)]
pub struct EventNotificationGateway {
    events: EventSender,
}

impl EventNotificationGateway {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl NotificationGateway for EventNotificationGateway {
    async fn order_placed(&self, order: &Order) {
        self.events
            .send_or_log(Event::OrderPlaced {
                order_id: order.id,
                order_slug: order.order_slug.clone(),
                user_id: order.user_id,
                total_amount: order.total_amount,
                payment_method: order.payment.method,
            })
            .await;
    }

    async fn order_confirmed(&self, order: &Order, transaction_ref: Option<&str>) {
        self.events
            .send_or_log(Event::OrderConfirmed {
                order_id: order.id,
                order_slug: order.order_slug.clone(),
                user_id: order.user_id,
                transaction_ref: transaction_ref.map(str::to_string),
            })
            .await;
    }

    async fn order_cancelled(&self, order: &Order, refunded: bool) {
        self.events
            .send_or_log(Event::OrderCancelled {
                order_id: order.id,
                order_slug: order.order_slug.clone(),
                user_id: order.user_id,
                reason: order.cancellation_reason.clone(),
                refunded,
            })
            .await;
    }

    async fn order_status_changed(&self, order: &Order, old_status: OrderStatus) {
        self.events
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status,
                new_status: order.order_status,
            })
            .await;
    }

    async fn payment_failed(&self, transaction_ref: &str, order_ids: &[Uuid], reason: &str) {
        self.events
            .send_or_log(Event::PaymentFailed {
                transaction_ref: transaction_ref.to_string(),
                order_ids: order_ids.to_vec(),
                reason: reason.to_string(),
            })
            .await;
    }
}
