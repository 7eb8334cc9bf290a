// Commerce: pricing, coupons, carts, checkout, orders, stock
pub mod commerce;

// Provider adapters, ledger and reconciliation
pub mod payments;

pub mod notifications;
