// Domain aggregates persisted as documents on their entity rows
pub mod cart;
pub mod coupon;
pub mod order;
