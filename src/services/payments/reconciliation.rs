//! Settles provider verdicts against the ledger.
//!
//! Webhooks, redirects and retries may all report the same payment, in any
//! order and any number of times. The ledger status change is the single
//! compare-and-set that decides which report applies the side effects; every
//! other report observes the settled state and returns it.

use chrono::Utc;
use metrics::counter;
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, TransactionTrait};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::ledger::{LedgerEntry, PaymentLedger};
use super::{
    to_minor_units, PaymentGatewayFacade, PaymentProvider, ProviderPaymentStatus,
    VerifiedPayment,
};
use crate::entities::commerce::order::{OrderStatus, PaymentStatus};
use crate::entities::commerce::Cart as CartEntity;
use crate::entities::payment_ledger::LedgerStatus;
use crate::errors::ServiceError;
use crate::models::cart::Cart;
use crate::models::order::Order;
use crate::services::commerce::cart_service::save_cart;
use crate::services::commerce::inventory::InventoryAdjuster;
use crate::services::commerce::order_service::{find_order, save_order};
use crate::services::notifications::NotificationGateway;

/// What a reconciliation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// This call confirmed the payment and its orders
    Confirmed { order_slugs: Vec<String> },
    /// Another report got there first
    AlreadyConfirmed { order_slugs: Vec<String> },
    /// The payment failed; orders were cancelled and restocked
    PaymentFailed { reason: String, order_slugs: Vec<String> },
    /// The provider has no verdict yet
    StillPending,
    /// Nothing was changed; the report does not match the ledger
    Rejected { reason: String },
}

impl ReconcileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Confirmed { .. } | ReconcileOutcome::AlreadyConfirmed { .. }
        )
    }

    pub fn order_slugs(&self) -> &[String] {
        match self {
            ReconcileOutcome::Confirmed { order_slugs }
            | ReconcileOutcome::AlreadyConfirmed { order_slugs }
            | ReconcileOutcome::PaymentFailed { order_slugs, .. } => order_slugs,
            _ => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Confirmed { .. } => "confirmed",
            ReconcileOutcome::AlreadyConfirmed { .. } => "already_confirmed",
            ReconcileOutcome::PaymentFailed { .. } => "failed",
            ReconcileOutcome::StillPending => "pending",
            ReconcileOutcome::Rejected { .. } => "rejected",
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    gateways: Arc<PaymentGatewayFacade>,
    ledger: PaymentLedger,
    inventory: InventoryAdjuster,
    notifier: Arc<dyn NotificationGateway>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateways: Arc<PaymentGatewayFacade>,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            db,
            gateways,
            ledger: PaymentLedger::new(),
            inventory: InventoryAdjuster::new(),
            notifier,
        }
    }

    /// Entry point for provider webhooks: authenticates the raw body, then
    /// reconciles what it reports.
    #[instrument(skip(self, payload, signature, timestamp), fields(bytes = payload.len()))]
    pub async fn handle_webhook(
        &self,
        provider_key: &str,
        payload: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let gateway = self.gateways.gateway_for_key(provider_key)?;
        let provider = gateway.provider();

        let authentic = signature
            .map(|sig| gateway.verify_webhook_signature(payload, sig, timestamp))
            .unwrap_or(false);
        if !authentic {
            counter!("settlement.webhooks.rejected_signatures", 1, "provider" => provider.to_string());
            warn!(
                security_event = true,
                %provider,
                signature_present = signature.is_some(),
                "webhook signature rejected"
            );
            return Err(ServiceError::SignatureMismatch(provider.to_string()));
        }

        let verified = gateway.parse_webhook(payload)?;
        self.reconcile(&verified).await
    }

    /// Entry point for the customer redirect: asks the provider, then
    /// reconciles its answer.
    #[instrument(skip(self))]
    pub async fn verify_and_reconcile(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let verified = self.gateways.verify_payment(provider, reference).await?;
        self.reconcile(&verified).await
    }

    /// Applies a normalized provider verdict exactly once.
    #[instrument(skip(self, verified), fields(reference = %verified.reference, provider = %verified.provider, status = ?verified.status))]
    pub async fn reconcile(
        &self,
        verified: &VerifiedPayment,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let outcome = self.reconcile_inner(verified).await?;
        counter!(
            "settlement.reconciliation.outcomes",
            1,
            "provider" => verified.provider.to_string(),
            "outcome" => outcome.as_str()
        );
        Ok(outcome)
    }

    async fn reconcile_inner(
        &self,
        verified: &VerifiedPayment,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let Some(entry) = self
            .ledger
            .find_by_reference(&*self.db, &verified.reference)
            .await?
        else {
            return Ok(anomaly(verified, "Unknown transaction reference"));
        };

        match verified.status {
            ProviderPaymentStatus::Pending => {
                info!("provider reports payment still pending");
                Ok(ReconcileOutcome::StillPending)
            }
            ProviderPaymentStatus::Failed => self.apply_failure(&entry, verified).await,
            ProviderPaymentStatus::Success => {
                let expected = to_minor_units(entry.amount)?;
                if expected != verified.amount_minor {
                    return Ok(anomaly(
                        verified,
                        &format!(
                            "Amount mismatch: expected {} got {}",
                            entry.amount,
                            verified.amount_major()
                        ),
                    ));
                }
                if let Some(currency) = &verified.currency {
                    if !currency.eq_ignore_ascii_case(&entry.currency) {
                        return Ok(anomaly(
                            verified,
                            &format!("Currency mismatch: expected {} got {}", entry.currency, currency),
                        ));
                    }
                }
                self.apply_success(&entry, verified).await
            }
        }
    }

    async fn apply_success(
        &self,
        entry: &LedgerEntry,
        verified: &VerifiedPayment,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let from = match entry.status {
            LedgerStatus::PendingConfirmation => LedgerStatus::PendingConfirmation,
            // The provider session was opened even though our call timed out
            LedgerStatus::Failed if entry.meta.initialization_failed => LedgerStatus::Failed,
            LedgerStatus::Confirmed => return self.heal_confirmed(entry, verified).await,
            LedgerStatus::Failed | LedgerStatus::Cancelled => {
                return Ok(anomaly(
                    verified,
                    &format!("Payment captured for a {} ledger entry", entry.status),
                ))
            }
        };

        let now = Utc::now();
        let paid_at = verified.paid_at.unwrap_or(now);
        let txn = self.db.begin().await?;

        let won = self
            .ledger
            .mark_confirmed(&txn, &entry.transaction_ref, from, verified.transaction_id.as_deref())
            .await?;
        if !won {
            txn.rollback().await?;
            info!("ledger already settled by a concurrent report");
            let current = self
                .ledger
                .find_by_reference(&*self.db, &entry.transaction_ref)
                .await?
                .ok_or_else(|| ServiceError::NotFound(entry.transaction_ref.clone()))?;
            return match current.status {
                LedgerStatus::Confirmed => self.heal_confirmed(&current, verified).await,
                other => Ok(anomaly(
                    verified,
                    &format!("Payment captured for a {} ledger entry", other),
                )),
            };
        }

        let mut confirmed = Vec::with_capacity(entry.meta.order_ids.len());
        let mut slugs = Vec::with_capacity(entry.meta.order_ids.len());
        for order_id in &entry.meta.order_ids {
            let mut order = find_order(&txn, *order_id).await?;
            slugs.push(order.order_slug.clone());
            if order.order_status != OrderStatus::Pending {
                error!(
                    anomaly = true,
                    %order_id,
                    status = %order.order_status,
                    "payment captured for an order that is no longer pending"
                );
                continue;
            }
            order.mark_paid(
                verified.transaction_id.clone(),
                &entry.transaction_ref,
                entry.amount,
                paid_at,
            );
            order.confirm(
                &format!("Payment confirmed via {}", verified.provider),
                Some("system"),
                now,
            )?;
            confirmed.push(save_order(&txn, &order).await?);
        }

        if confirmed.is_empty() {
            txn.rollback().await?;
            return Ok(anomaly(verified, "Payment captured but no order is awaiting it"));
        }

        if let Some(cart_id) = entry.meta.cart_id {
            clear_cart(&txn, cart_id).await?;
        }
        txn.commit().await?;

        info!(orders = confirmed.len(), "payment confirmed");
        for order in &confirmed {
            self.notifier
                .order_confirmed(order, Some(&entry.transaction_ref))
                .await;
        }
        Ok(ReconcileOutcome::Confirmed { order_slugs: slugs })
    }

    /// A repeated success report. Orders left pending by an earlier partial
    /// run are confirmed; confirmed orders are left untouched.
    async fn heal_confirmed(
        &self,
        entry: &LedgerEntry,
        verified: &VerifiedPayment,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let now = Utc::now();
        let mut slugs = Vec::with_capacity(entry.meta.order_ids.len());
        let mut healed = Vec::new();

        for order_id in &entry.meta.order_ids {
            let mut order = find_order(&*self.db, *order_id).await?;
            slugs.push(order.order_slug.clone());
            if order.order_status != OrderStatus::Pending
                || order.payment.status == PaymentStatus::Completed
            {
                continue;
            }
            order.mark_paid(
                entry.provider_transaction_id.clone(),
                &entry.transaction_ref,
                entry.amount,
                entry.confirmed_at.unwrap_or(now),
            );
            order.confirm(
                &format!("Payment confirmed via {}", verified.provider),
                Some("system"),
                now,
            )?;
            match save_order(&*self.db, &order).await {
                Ok(saved) => healed.push(saved),
                // Someone else healed it in the meantime
                Err(ServiceError::ConcurrentModification(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if !healed.is_empty() {
            warn!(orders = healed.len(), "healed orders left pending by an earlier run");
            for order in &healed {
                self.notifier
                    .order_confirmed(order, Some(&entry.transaction_ref))
                    .await;
            }
        }
        Ok(ReconcileOutcome::AlreadyConfirmed { order_slugs: slugs })
    }

    async fn apply_failure(
        &self,
        entry: &LedgerEntry,
        verified: &VerifiedPayment,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let reason = verified
            .message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Payment was not completed".to_string());

        match entry.status {
            LedgerStatus::PendingConfirmation => {}
            LedgerStatus::Failed | LedgerStatus::Cancelled => {
                info!("failure already recorded");
                return Ok(ReconcileOutcome::PaymentFailed {
                    reason: entry.failure_reason.clone().unwrap_or(reason),
                    order_slugs: Vec::new(),
                });
            }
            LedgerStatus::Confirmed => {
                return Ok(anomaly(verified, "Failure reported for a confirmed payment"));
            }
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;
        if !self
            .ledger
            .mark_failed(&txn, &entry.transaction_ref, &reason)
            .await?
        {
            txn.rollback().await?;
            info!("ledger already settled by a concurrent report");
            return Ok(ReconcileOutcome::PaymentFailed {
                reason,
                order_slugs: Vec::new(),
            });
        }

        let mut cancelled: Vec<Order> = Vec::new();
        let mut slugs = Vec::new();
        for order_id in &entry.meta.order_ids {
            let mut order = find_order(&txn, *order_id).await?;
            slugs.push(order.order_slug.clone());
            if order.order_status != OrderStatus::Pending {
                continue;
            }
            order.fail_payment(&reason, now)?;
            let saved = save_order(&txn, &order).await?;
            self.inventory.release(&txn, &saved.items).await?;
            cancelled.push(saved);
        }
        txn.commit().await?;

        warn!(orders = cancelled.len(), %reason, "payment failed, orders cancelled");
        self.notifier
            .payment_failed(&entry.transaction_ref, &entry.meta.order_ids, &reason)
            .await;
        for order in &cancelled {
            self.notifier.order_cancelled(order, false).await;
        }
        Ok(ReconcileOutcome::PaymentFailed {
            reason,
            order_slugs: slugs,
        })
    }
}

/// Empties and retires the cart a payment was made from, if still active.
async fn clear_cart<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<(), ServiceError> {
    let Some(model) = CartEntity::find_by_id(cart_id).one(conn).await? else {
        return Ok(());
    };
    if !model.is_active {
        return Ok(());
    }
    let mut cart = Cart::try_from(model)?;
    cart.clear();
    cart.is_active = false;
    save_cart(conn, &cart).await?;
    Ok(())
}

fn anomaly(verified: &VerifiedPayment, reason: &str) -> ReconcileOutcome {
    counter!("settlement.reconciliation.anomalies", 1, "provider" => verified.provider.to_string());
    error!(
        anomaly = true,
        reference = %verified.reference,
        provider = %verified.provider,
        amount_minor = verified.amount_minor,
        reason,
        "payment report rejected"
    );
    ReconcileOutcome::Rejected {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_outcomes() {
        let slugs = vec!["abc".to_string()];
        assert!(ReconcileOutcome::Confirmed {
            order_slugs: slugs.clone()
        }
        .is_success());
        assert!(ReconcileOutcome::AlreadyConfirmed {
            order_slugs: slugs.clone()
        }
        .is_success());
        assert!(!ReconcileOutcome::StillPending.is_success());
        assert!(!ReconcileOutcome::Rejected {
            reason: "x".into()
        }
        .is_success());
        assert_eq!(
            ReconcileOutcome::PaymentFailed {
                reason: "x".into(),
                order_slugs: slugs.clone()
            }
            .order_slugs(),
            slugs.as_slice()
        );
    }
}
