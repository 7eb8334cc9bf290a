use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    config::{PaymentsConfig, PricingConfig},
    entities::commerce::{
        order::{DeliveryMethod, PaymentMethod},
        order_coupon,
    },
    errors::ServiceError,
    models::{
        cart::Cart,
        order::{NewOrder, Order, OrderItem},
    },
    services::{
        commerce::{
            cart_service::{save_cart, CartService},
            coupons::CouponEvaluator,
            inventory::InventoryAdjuster,
            order_service::{find_order_by_slug, insert_order, save_order},
        },
        notifications::NotificationGateway,
        payments::{
            compute_fee, generate_reference,
            ledger::{LedgerEntry, LedgerMeta, PaymentLedger, PendingPurchase},
            GatewayResponse, PaymentData, PaymentGatewayFacade, PaymentProvider,
        },
    },
};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutInput {
    pub shipping_address_id: Uuid,
    pub delivery_method: DeliveryMethod,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    /// Overrides the email forwarded by the gateway
    #[validate(email)]
    pub email: Option<String>,
    /// `web` or `mobile`; picks the redirect target after payment
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPaymentInput {
    #[validate(email)]
    pub email: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResult {
    pub order: Order,
    /// Provider session, absent for cash on delivery
    pub payment: Option<GatewayResponse>,
}

/// Turns the caller's cart into an order and opens the payment session.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    carts: CartService,
    coupons: CouponEvaluator,
    gateways: Arc<PaymentGatewayFacade>,
    notifier: Arc<dyn NotificationGateway>,
    ledger: PaymentLedger,
    inventory: InventoryAdjuster,
    pricing: PricingConfig,
    currency: String,
    callback_url: String,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        carts: CartService,
        coupons: CouponEvaluator,
        gateways: Arc<PaymentGatewayFacade>,
        notifier: Arc<dyn NotificationGateway>,
        pricing: PricingConfig,
        payments: &PaymentsConfig,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            db,
            carts,
            coupons,
            gateways,
            notifier,
            ledger: PaymentLedger::new(),
            inventory: InventoryAdjuster::new(),
            pricing,
            currency: currency.into(),
            callback_url: payments.callback_url.clone(),
        }
    }

    /// Creates the order, reserves stock and, for online methods, logs the
    /// pending payment, all in one transaction. The provider is called after
    /// commit; if it fails the order stays pending with a failed payment that
    /// can be retried.
    #[instrument(skip(self, caller, input), fields(user_id = %caller.user_id, method = %input.payment_method))]
    pub async fn checkout(
        &self,
        caller: &AuthUser,
        input: CheckoutInput,
    ) -> Result<CheckoutResult, ServiceError> {
        input.validate()?;
        let user_id = caller.user_id;
        let now = Utc::now();

        let cart = self.carts.get_cart(user_id).await?;
        if cart.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        let stock = self.carts.check_stock(&cart).await?;
        if !stock.valid {
            let lines: Vec<String> = stock
                .out_of_stock
                .iter()
                .map(|i| format!("{} (requested {}, available {})", i.name, i.requested, i.available))
                .collect();
            counter!("settlement.checkout.rejected", 1, "reason" => "stock");
            return Err(ServiceError::InsufficientStock(lines.join("; ")));
        }

        for applied in &cart.applied_coupons {
            self.coupons
                .validate(&applied.code, user_id, cart.subtotal, &cart.items, now)
                .await?;
        }

        let provider = PaymentProvider::from_method(input.payment_method);
        let email = input.email.clone().or_else(|| caller.email.clone());
        if let Some(provider) = provider {
            self.gateways.gateway(provider)?;
            if provider == PaymentProvider::Paystack && email.is_none() {
                return Err(ServiceError::ValidationError(
                    "Email is required for Paystack payments".to_string(),
                ));
            }
        }

        let mut order = Order::place(
            NewOrder {
                user_id,
                items: cart.items.iter().map(OrderItem::from).collect(),
                applied_coupons: cart.applied_coupons.clone(),
                shipping_address_id: input.shipping_address_id,
                delivery_method: input.delivery_method,
                payment_method: input.payment_method,
                delivery_fee: self.pricing.delivery_fee_for(input.delivery_method),
                service_charge: compute_fee(input.payment_method, cart.subtotal),
                tax_rate: self.pricing.tax_rate,
                notes: input.notes.clone(),
            },
            now,
        );

        let reference = provider.map(|_| generate_reference(order.id, now));
        order.payment.reference = reference.clone();
        if provider.is_none() {
            order.confirm("Cash on delivery order confirmed", Some("system"), now)?;
        }

        let txn = self.db.begin().await?;
        insert_order(&txn, &mut order).await?;
        record_coupon_redemptions(&txn, &order, now).await?;
        self.inventory.reserve(&txn, &order.items).await?;

        let entry = match (provider, &reference) {
            (Some(provider), Some(reference)) => Some(
                self.ledger
                    .log_purchase_pending(
                        &txn,
                        PendingPurchase {
                            channel: provider.as_ref(),
                            user_id,
                            meta: LedgerMeta {
                                order_ids: vec![order.id],
                                cart_id: Some(cart.id),
                                ..LedgerMeta::default()
                            },
                            amount: order.total_amount,
                            currency: &self.currency,
                            transaction_ref: reference,
                        },
                    )
                    .await?,
            ),
            _ => {
                retire_cart(&txn, &cart).await?;
                None
            }
        };
        txn.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "order placed"
        );
        counter!("settlement.checkout.orders_placed", 1, "method" => input.payment_method.to_string());

        for applied in &order.applied_coupons {
            self.coupons.record_redemption(&applied.code).await;
        }
        self.notifier.order_placed(&order).await;

        let payment = match (provider, entry) {
            (Some(provider), Some(entry)) => Some(
                self.open_session(provider, &entry, &mut order, email, input.platform.as_deref())
                    .await?,
            ),
            _ => None,
        };

        Ok(CheckoutResult { order, payment })
    }

    /// Re-opens the provider session of a pending order whose payment could
    /// not be initialized, with the original reference.
    #[instrument(skip(self, caller, input), fields(user_id = %caller.user_id))]
    pub async fn retry_payment(
        &self,
        caller: &AuthUser,
        slug: &str,
        input: RetryPaymentInput,
    ) -> Result<CheckoutResult, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let mut order = find_order_by_slug(&txn, slug).await?;
        if order.user_id != caller.user_id {
            return Err(ServiceError::NotFound(format!("Order {} not found", slug)));
        }
        let provider = PaymentProvider::from_method(order.payment.method).ok_or_else(|| {
            ServiceError::InvalidOperation(
                "Cash on delivery orders have no online payment".to_string(),
            )
        })?;
        let reference = order.payment.reference.clone().ok_or_else(|| {
            ServiceError::InvalidOperation("Order has no payment reference".to_string())
        })?;
        let entry = self
            .ledger
            .find_by_reference(&txn, &reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", reference)))?;

        order.reopen_payment()?;
        if !self.ledger.reopen(&txn, &entry).await? {
            return Err(ServiceError::Conflict(
                "Payment is already being processed".to_string(),
            ));
        }
        let entry = self
            .ledger
            .find_by_reference(&txn, &reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", reference)))?;
        let mut order = save_order(&txn, &order).await?;
        txn.commit().await?;
        info!(order_id = %order.id, %reference, "payment reopened for retry");

        let email = input.email.or_else(|| caller.email.clone());
        let payment = self
            .open_session(provider, &entry, &mut order, email, input.platform.as_deref())
            .await?;
        Ok(CheckoutResult {
            order,
            payment: Some(payment),
        })
    }

    /// Calls the provider. A failure is recorded on the ledger and the order
    /// and reported in the envelope rather than as an error.
    async fn open_session(
        &self,
        provider: PaymentProvider,
        entry: &LedgerEntry,
        order: &mut Order,
        email: Option<String>,
        platform: Option<&str>,
    ) -> Result<GatewayResponse, ServiceError> {
        let data = PaymentData {
            reference: entry.transaction_ref.clone(),
            amount: order.total_amount,
            currency: self.currency.clone(),
            email,
            user_id: order.user_id,
            order_ids: entry.meta.order_ids.clone(),
            callback_url: self.callback_for(provider, &entry.transaction_ref, platform),
            description: format!("Order {}", order.order_number),
        };

        match self.gateways.initialize_payment(provider, &data).await {
            Ok(init) => {
                if let Some(provider_reference) = &init.provider_reference {
                    if let Err(e) = self
                        .ledger
                        .attach_provider_reference(&*self.db, entry, provider_reference)
                        .await
                    {
                        warn!(error = %e, "could not record provider reference");
                    }
                }
                Ok(GatewayResponse::ok(provider.to_string(), &init))
            }
            Err(gateway_error) => {
                let reason = gateway_error.to_string();
                error!(
                    %provider,
                    reference = %entry.transaction_ref,
                    error = %reason,
                    "payment initialization failed"
                );
                self.ledger
                    .mark_initialization_failed(&*self.db, entry, &reason)
                    .await?;
                order.mark_payment_initialization_failed();
                *order = save_order(&*self.db, order).await?;
                Ok(GatewayResponse::failed(provider.to_string(), reason))
            }
        }
    }

    fn callback_for(&self, provider: PaymentProvider, reference: &str, platform: Option<&str>) -> String {
        let mut url = format!(
            "{}?provider={}&reference={}",
            self.callback_url,
            provider,
            url::form_urlencoded::byte_serialize(reference.as_bytes()).collect::<String>()
        );
        if let Some(platform) = platform {
            url.push_str("&platform=");
            url.extend(url::form_urlencoded::byte_serialize(platform.as_bytes()));
        }
        url
    }
}

/// One `order_coupons` row per applied code; per-user limits count them.
async fn record_coupon_redemptions<C: ConnectionTrait>(
    conn: &C,
    order: &Order,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    for applied in &order.applied_coupons {
        order_coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            user_id: Set(order.user_id),
            coupon_code: Set(applied.code.clone()),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;
    }
    Ok(())
}

/// Empties and deactivates the cart an order was placed from.
async fn retire_cart<C: ConnectionTrait>(conn: &C, cart: &Cart) -> Result<(), ServiceError> {
    let mut retired = cart.clone();
    retired.clear();
    retired.is_active = false;
    save_cart(conn, &retired).await?;
    Ok(())
}
