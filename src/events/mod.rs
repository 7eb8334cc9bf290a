use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::commerce::order::{OrderStatus, PaymentMethod};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishing never fails the caller's operation.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "dropping event");
        }
    }
}

/// Things downstream consumers (notification delivery, analytics) care about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_slug: String,
        user_id: Uuid,
        total_amount: Decimal,
        payment_method: PaymentMethod,
    },
    OrderConfirmed {
        order_id: Uuid,
        order_slug: String,
        user_id: Uuid,
        transaction_ref: Option<String>,
    },
    OrderCancelled {
        order_id: Uuid,
        order_slug: String,
        user_id: Uuid,
        reason: Option<String>,
        refunded: bool,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentFailed {
        transaction_ref: String,
        order_ids: Vec<Uuid>,
        reason: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderPlaced { .. } => "order_placed",
            Event::OrderConfirmed { .. } => "order_confirmed",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::PaymentFailed { .. } => "payment_failed",
        }
    }
}

/// Consumer of published events
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the channel and fans every event out to `handlers`. A failing
/// handler is logged and does not stop the loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                payment_method,
                total_amount,
                ..
            } => {
                info!(%order_id, %payment_method, %total_amount, "order placed");
            }
            Event::OrderConfirmed {
                order_id,
                transaction_ref,
                ..
            } => {
                info!(%order_id, transaction_ref = ?transaction_ref, "order confirmed");
            }
            Event::OrderCancelled {
                order_id, refunded, ..
            } => {
                info!(%order_id, refunded, "order cancelled");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::PaymentFailed {
                transaction_ref,
                reason,
                ..
            } => {
                warn!(%transaction_ref, %reason, "payment failed");
            }
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(event = event.name(), error = %e, "event handler failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: &Event) -> Result<(), String> {
            self.0.lock().unwrap().push(event.name());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle_event(&self, _event: &Event) -> Result<(), String> {
            Err("boom".into())
        }
    }

    #[tokio::test]
    async fn events_reach_every_handler() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let recorder = Arc::new(Recorder::default());

        sender
            .send(Event::PaymentFailed {
                transaction_ref: "PAY_1_1".into(),
                order_ids: vec![],
                reason: "declined".into(),
            })
            .await
            .unwrap();
        drop(sender);

        process_events(rx, vec![Arc::new(Failing), recorder.clone()]).await;
        assert_eq!(*recorder.0.lock().unwrap(), vec!["payment_failed"]);
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        let result = sender
            .send(Event::OrderStatusChanged {
                order_id: Uuid::new_v4(),
                old_status: OrderStatus::Confirmed,
                new_status: OrderStatus::Shipped,
            })
            .await;
        assert!(result.is_err());
    }
}
