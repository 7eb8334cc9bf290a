/// Commerce services module - carts, checkout and the order lifecycle
pub mod cart_service;
pub mod checkout_service;
pub mod coupons;
pub mod inventory;
pub mod order_service;
pub mod pricing;

// Re-export services for convenience
pub use cart_service::CartService;
pub use checkout_service::CheckoutService;
pub use coupons::{CouponEvaluator, DbCouponCatalog};
pub use inventory::{DbProductCatalog, InventoryAdjuster};
pub use order_service::OrderService;
