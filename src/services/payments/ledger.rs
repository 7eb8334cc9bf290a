//! Payment ledger: one row per payment attempt, keyed by transaction reference.
//!
//! Status changes are compare-and-set updates filtered on the current
//! status, so of two concurrent reconcilers exactly one wins.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::entities::payment_ledger::{self, LedgerStatus};
use crate::entities::PaymentLedger as LedgerEntity;
use crate::errors::ServiceError;
use crate::services::commerce::pricing::round_money;

/// Context stored with a ledger row so reconciliation can find what to update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LedgerMeta {
    pub order_ids: Vec<Uuid>,
    #[serde(default)]
    pub cart_id: Option<Uuid>,
    /// Set when the provider session could not be opened; such an entry may
    /// be reopened for a retry with the same reference.
    #[serde(default)]
    pub initialization_failed: bool,
    #[serde(default)]
    pub provider_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_ref: String,
    pub payment_channel: String,
    pub status: LedgerStatus,
    pub meta: LedgerMeta,
    pub provider_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<payment_ledger::Model> for LedgerEntry {
    type Error = ServiceError;

    fn try_from(model: payment_ledger::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            amount: round_money(model.amount),
            currency: model.currency,
            transaction_ref: model.transaction_ref,
            payment_channel: model.payment_channel,
            status: model.payment_status,
            meta: serde_json::from_value(model.meta)?,
            provider_transaction_id: model.provider_transaction_id,
            failure_reason: model.failure_reason,
            confirmed_at: model.confirmed_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// Fields of a new pending entry
#[derive(Debug, Clone)]
pub struct PendingPurchase<'a> {
    pub channel: &'a str,
    pub user_id: Uuid,
    pub meta: LedgerMeta,
    pub amount: Decimal,
    pub currency: &'a str,
    pub transaction_ref: &'a str,
}

/// Stateless ledger operations; pass a transaction to group them with other
/// writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentLedger;

impl PaymentLedger {
    pub fn new() -> Self {
        Self
    }

    /// Inserts exactly one `pending_confirmation` row. A reused reference is
    /// a conflict, never an overwrite.
    #[instrument(skip(self, conn, purchase), fields(reference = purchase.transaction_ref))]
    pub async fn log_purchase_pending<C: ConnectionTrait>(
        &self,
        conn: &C,
        purchase: PendingPurchase<'_>,
    ) -> Result<LedgerEntry, ServiceError> {
        let now = Utc::now();
        let row = payment_ledger::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(purchase.user_id),
            amount: Set(round_money(purchase.amount)),
            currency: Set(purchase.currency.to_string()),
            transaction_ref: Set(purchase.transaction_ref.to_string()),
            payment_channel: Set(purchase.channel.to_string()),
            payment_status: Set(LedgerStatus::PendingConfirmation),
            meta: Set(serde_json::to_value(&purchase.meta)?),
            provider_transaction_id: Set(None),
            failure_reason: Set(None),
            confirmed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match row.insert(conn).await {
            Ok(model) => LedgerEntry::try_from(model),
            Err(e) if is_unique_violation(&e) => Err(ServiceError::Conflict(format!(
                "transaction reference {} already logged",
                purchase.transaction_ref
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_reference<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction_ref: &str,
    ) -> Result<Option<LedgerEntry>, ServiceError> {
        LedgerEntity::find()
            .filter(payment_ledger::Column::TransactionRef.eq(transaction_ref))
            .one(conn)
            .await?
            .map(LedgerEntry::try_from)
            .transpose()
    }

    /// `from` → confirmed. False when the entry was not in `from`.
    pub async fn mark_confirmed<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction_ref: &str,
        from: LedgerStatus,
        provider_transaction_id: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let result = LedgerEntity::update_many()
            .col_expr(
                payment_ledger::Column::PaymentStatus,
                Expr::value(LedgerStatus::Confirmed),
            )
            .col_expr(
                payment_ledger::Column::ProviderTransactionId,
                Expr::value(provider_transaction_id.map(str::to_string)),
            )
            .col_expr(payment_ledger::Column::FailureReason, Expr::value(Option::<String>::None))
            .col_expr(payment_ledger::Column::ConfirmedAt, Expr::value(Some(now)))
            .col_expr(payment_ledger::Column::UpdatedAt, Expr::value(now))
            .filter(payment_ledger::Column::TransactionRef.eq(transaction_ref))
            .filter(payment_ledger::Column::PaymentStatus.eq(from))
            .exec(conn)
            .await?;
        debug!(transaction_ref, rows = result.rows_affected, "ledger confirm");
        Ok(result.rows_affected == 1)
    }

    /// pending_confirmation → failed
    pub async fn mark_failed<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction_ref: &str,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let result = LedgerEntity::update_many()
            .col_expr(
                payment_ledger::Column::PaymentStatus,
                Expr::value(LedgerStatus::Failed),
            )
            .col_expr(
                payment_ledger::Column::FailureReason,
                Expr::value(Some(reason.to_string())),
            )
            .col_expr(payment_ledger::Column::UpdatedAt, Expr::value(now))
            .filter(payment_ledger::Column::TransactionRef.eq(transaction_ref))
            .filter(payment_ledger::Column::PaymentStatus.eq(LedgerStatus::PendingConfirmation))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// pending_confirmation or failed → cancelled, when the orders behind the
    /// entry were cancelled before the payment settled.
    pub async fn mark_cancelled<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction_ref: &str,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        let result = LedgerEntity::update_many()
            .col_expr(
                payment_ledger::Column::PaymentStatus,
                Expr::value(LedgerStatus::Cancelled),
            )
            .col_expr(
                payment_ledger::Column::FailureReason,
                Expr::value(Some(reason.to_string())),
            )
            .col_expr(payment_ledger::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment_ledger::Column::TransactionRef.eq(transaction_ref))
            .filter(payment_ledger::Column::PaymentStatus.is_in([
                LedgerStatus::PendingConfirmation,
                LedgerStatus::Failed,
            ]))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// pending_confirmation → failed, flagged as a failed initialization so
    /// the same reference can be retried.
    pub async fn mark_initialization_failed<C: ConnectionTrait>(
        &self,
        conn: &C,
        entry: &LedgerEntry,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        let mut meta = entry.meta.clone();
        meta.initialization_failed = true;
        self.update_status_and_meta(
            conn,
            &entry.transaction_ref,
            LedgerStatus::PendingConfirmation,
            LedgerStatus::Failed,
            &meta,
            Some(reason),
        )
        .await
    }

    /// Records the provider's own session reference on a pending entry.
    pub async fn attach_provider_reference<C: ConnectionTrait>(
        &self,
        conn: &C,
        entry: &LedgerEntry,
        provider_reference: &str,
    ) -> Result<bool, ServiceError> {
        let mut meta = entry.meta.clone();
        meta.provider_reference = Some(provider_reference.to_string());
        self.update_status_and_meta(
            conn,
            &entry.transaction_ref,
            LedgerStatus::PendingConfirmation,
            LedgerStatus::PendingConfirmation,
            &meta,
            None,
        )
        .await
    }

    /// failed (initialization) → pending_confirmation, keeping the reference.
    pub async fn reopen<C: ConnectionTrait>(
        &self,
        conn: &C,
        entry: &LedgerEntry,
    ) -> Result<bool, ServiceError> {
        if entry.status != LedgerStatus::Failed || !entry.meta.initialization_failed {
            return Ok(false);
        }
        let mut meta = entry.meta.clone();
        meta.initialization_failed = false;
        self.update_status_and_meta(
            conn,
            &entry.transaction_ref,
            LedgerStatus::Failed,
            LedgerStatus::PendingConfirmation,
            &meta,
            None,
        )
        .await
    }

    async fn update_status_and_meta<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction_ref: &str,
        from: LedgerStatus,
        to: LedgerStatus,
        meta: &LedgerMeta,
        failure_reason: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let result = LedgerEntity::update_many()
            .col_expr(payment_ledger::Column::PaymentStatus, Expr::value(to))
            .col_expr(
                payment_ledger::Column::Meta,
                Expr::value(serde_json::to_value(meta)?),
            )
            .col_expr(
                payment_ledger::Column::FailureReason,
                Expr::value(failure_reason.map(str::to_string)),
            )
            .col_expr(payment_ledger::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment_ledger::Column::TransactionRef.eq(transaction_ref))
            .filter(payment_ledger::Column::PaymentStatus.eq(from))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }
}
