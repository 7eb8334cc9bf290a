use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    db::is_unique_violation,
    entities::commerce::{
        order::{self, OrderStatus, PaymentStatus},
        Order as OrderEntity,
    },
    errors::ServiceError,
    models::order::{CancelOutcome, Order},
    services::{
        commerce::inventory::InventoryAdjuster, notifications::NotificationGateway,
        payments::ledger::PaymentLedger,
    },
};

const MAX_IDENTIFIER_ATTEMPTS: u32 = 5;
const MAX_PAGE_SIZE: u64 = 100;

/// Inserts a new order, drawing fresh number and slug on a collision. Each
/// attempt runs in a savepoint so a failed insert does not poison `conn`.
pub(crate) async fn insert_order<C>(conn: &C, order: &mut Order) -> Result<(), ServiceError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let savepoint = conn.begin().await?;
        match order.to_active_model()?.insert(&savepoint).await {
            Ok(_) => {
                savepoint.commit().await?;
                return Ok(());
            }
            Err(e) if is_unique_violation(&e) && attempt < MAX_IDENTIFIER_ATTEMPTS => {
                savepoint.rollback().await?;
                debug!(attempt, "order identifier collision, regenerating");
                order.regenerate_identifiers();
            }
            Err(e) => {
                savepoint.rollback().await?;
                return Err(e.into());
            }
        }
    }
}

pub(crate) async fn find_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Order, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
        .and_then(Order::try_from)
}

pub(crate) async fn find_order_by_slug<C: ConnectionTrait>(
    conn: &C,
    slug: &str,
) -> Result<Order, ServiceError> {
    OrderEntity::find()
        .filter(order::Column::OrderSlug.eq(slug))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", slug)))
        .and_then(Order::try_from)
}

/// Writes `order` if its version is unchanged since it was read. Totals are
/// recomputed first; the stored order is returned.
pub(crate) async fn save_order<C: ConnectionTrait>(
    conn: &C,
    order: &Order,
) -> Result<Order, ServiceError> {
    let mut next = order.clone();
    next.prepare_for_save(Utc::now());
    next.version = order.version + 1;

    let result = OrderEntity::update_many()
        .set(next.to_active_model()?)
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Version.eq(order.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(order.id));
    }
    Ok(next)
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderInput {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnOrderInput {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateOrderInput {
    pub rating: i32,
    #[validate(length(max = 2000))]
    pub review: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusInput {
    pub status: OrderStatus,
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: Option<String>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
}

/// Read and lifecycle operations on placed orders.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryAdjuster,
    ledger: PaymentLedger,
    notifier: Arc<dyn NotificationGateway>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, notifier: Arc<dyn NotificationGateway>) -> Self {
        Self {
            db,
            inventory: InventoryAdjuster::new(),
            ledger: PaymentLedger::new(),
            notifier,
        }
    }

    /// Newest first, `page` starting at 1.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);

        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(Order::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderPage {
            orders,
            page,
            per_page,
            total,
        })
    }

    /// Orders of other users are reported as missing.
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn get_order(&self, caller: &AuthUser, slug: &str) -> Result<Order, ServiceError> {
        let order = find_order_by_slug(&*self.db, slug).await?;
        if !caller.can_access(order.user_id) {
            return Err(ServiceError::NotFound(format!("Order {} not found", slug)));
        }
        Ok(order)
    }

    /// Cancels a pending or confirmed order and puts its stock back. A paid
    /// order is refunded instead.
    #[instrument(skip(self, caller, input), fields(user_id = %caller.user_id))]
    pub async fn cancel_order(
        &self,
        caller: &AuthUser,
        slug: &str,
        input: CancelOrderInput,
    ) -> Result<Order, ServiceError> {
        input.validate()?;
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let mut order = find_order_by_slug(&txn, slug).await?;
        if !caller.can_access(order.user_id) {
            return Err(ServiceError::NotFound(format!("Order {} not found", slug)));
        }
        let payment_open = payment_is_open(&order);

        let outcome = order.cancel(input.reason, Some(caller.actor_label()), now)?;
        let saved = save_order(&txn, &order).await?;
        self.inventory.release(&txn, &saved.items).await?;
        if payment_open {
            self.close_unsettled_payment(&txn, &saved).await?;
        }
        txn.commit().await?;

        let refunded = outcome == CancelOutcome::Refunded;
        info!(order_id = %saved.id, refunded, "order cancelled");
        counter!("settlement.orders.cancelled", 1);
        self.notifier.order_cancelled(&saved, refunded).await;
        Ok(saved)
    }

    #[instrument(skip(self, caller, input), fields(user_id = %caller.user_id))]
    pub async fn request_return(
        &self,
        caller: &AuthUser,
        slug: &str,
        input: ReturnOrderInput,
    ) -> Result<Order, ServiceError> {
        input.validate()?;
        let mut order = self.get_order(caller, slug).await?;
        let old_status = order.order_status;
        order.request_return(input.reason, Some(caller.actor_label()), Utc::now())?;
        let saved = save_order(&*self.db, &order).await?;
        self.notifier.order_status_changed(&saved, old_status).await;
        Ok(saved)
    }

    #[instrument(skip(self, caller, input), fields(user_id = %caller.user_id))]
    pub async fn rate_order(
        &self,
        caller: &AuthUser,
        slug: &str,
        input: RateOrderInput,
    ) -> Result<Order, ServiceError> {
        input.validate()?;
        let mut order = self.get_order(caller, slug).await?;
        if order.user_id != caller.user_id {
            return Err(ServiceError::Forbidden(
                "Only the customer can rate an order".to_string(),
            ));
        }
        order.rate(input.rating, input.review)?;
        save_order(&*self.db, &order).await
    }

    /// Admin-driven transitions. Stock goes back when an order is cancelled,
    /// or refunded before it shipped.
    #[instrument(skip(self, admin, input), fields(status = %input.status))]
    pub async fn update_status(
        &self,
        admin: &AuthUser,
        slug: &str,
        input: UpdateOrderStatusInput,
    ) -> Result<Order, ServiceError> {
        input.validate()?;
        if !admin.is_admin() {
            return Err(ServiceError::Forbidden("Admin role required".to_string()));
        }

        let now = Utc::now();
        let by = Some(admin.actor_label());
        let txn = self.db.begin().await?;
        let mut order = find_order_by_slug(&txn, slug).await?;
        let old_status = order.order_status;

        let mut restock = false;
        let mut close_payment = false;
        let mut cancel_outcome = None;
        match input.status {
            OrderStatus::Confirmed => {
                order.confirm(input.note.as_deref().unwrap_or("Order confirmed"), by, now)?
            }
            OrderStatus::Processing => order.start_processing(by, now)?,
            OrderStatus::Shipped => order.ship(input.tracking_number, by, now)?,
            OrderStatus::Delivered => order.deliver(by, now)?,
            OrderStatus::Cancelled => {
                close_payment = payment_is_open(&order);
                cancel_outcome = Some(order.cancel(input.note, by, now)?);
                restock = true;
            }
            OrderStatus::Refunded => {
                restock = matches!(old_status, OrderStatus::Confirmed | OrderStatus::Processing);
                order.refund(by, now)?;
            }
            OrderStatus::Pending | OrderStatus::Returned => {
                return Err(ServiceError::InvalidOperation(format!(
                    "Orders cannot be moved to {} by an admin",
                    input.status
                )))
            }
        }

        let saved = save_order(&txn, &order).await?;
        if restock {
            self.inventory.release(&txn, &saved.items).await?;
        }
        if close_payment {
            self.close_unsettled_payment(&txn, &saved).await?;
        }
        txn.commit().await?;

        info!(order_id = %saved.id, from = %old_status, to = %saved.order_status, "order status updated");
        if let Some(outcome) = cancel_outcome {
            self.notifier
                .order_cancelled(&saved, outcome == CancelOutcome::Refunded)
                .await;
        }
        self.notifier.order_status_changed(&saved, old_status).await;
        Ok(saved)
    }

    /// Moves the ledger entry of a cancelled online order to cancelled, so a
    /// late success report is rejected instead of applied.
    async fn close_unsettled_payment<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &Order,
    ) -> Result<(), ServiceError> {
        if !order.payment.method.is_online() {
            return Ok(());
        }
        if let Some(reference) = &order.payment.reference {
            let closed = self
                .ledger
                .mark_cancelled(conn, reference, "order cancelled")
                .await?;
            debug!(reference = %reference, closed, "ledger entry closed for cancelled order");
        }
        Ok(())
    }
}

/// Unpaid, or failed before settling.
fn payment_is_open(order: &Order) -> bool {
    matches!(
        order.payment.status,
        PaymentStatus::Pending | PaymentStatus::Failed
    )
}
