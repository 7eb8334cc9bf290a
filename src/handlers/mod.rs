pub mod admin;
pub mod cart;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payments;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    commerce::{
        inventory::ProductCatalog, CartService, CheckoutService, CouponEvaluator,
        DbCouponCatalog, DbProductCatalog, InventoryAdjuster, OrderService,
    },
    notifications::NotificationGateway,
    payments::{reconciliation::ReconciliationService, PaymentGatewayFacade},
};

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub reconciliation: ReconciliationService,
    pub gateways: Arc<PaymentGatewayFacade>,
    pub inventory: InventoryAdjuster,
}

impl AppServices {
    /// Wires every service against the database-backed catalogs. The gateway
    /// facade and the notifier are passed in so tests can substitute them.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        gateways: Arc<PaymentGatewayFacade>,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Self {
        let products: Arc<dyn ProductCatalog> = Arc::new(DbProductCatalog::new(db.clone()));
        let coupons = CouponEvaluator::new(Arc::new(DbCouponCatalog::new(db.clone())));

        let carts = CartService::new(
            db.clone(),
            products,
            coupons.clone(),
            config.pricing.clone(),
        );
        let checkout = CheckoutService::new(
            db.clone(),
            carts.clone(),
            coupons,
            gateways.clone(),
            notifier.clone(),
            config.pricing.clone(),
            &config.payments,
            config.currency.clone(),
        );
        let orders = OrderService::new(db.clone(), notifier.clone());
        let reconciliation = ReconciliationService::new(db, gateways.clone(), notifier);

        Self {
            carts,
            checkout,
            orders,
            reconciliation,
            gateways,
            inventory: InventoryAdjuster::new(),
        }
    }
}
