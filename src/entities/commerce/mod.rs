pub mod cart;
pub mod coupon;
pub mod order;
pub mod order_coupon;
pub mod product;
pub mod product_variant;

pub use cart::Entity as Cart;
pub use coupon::Entity as Coupon;
pub use order::Entity as Order;
pub use order_coupon::Entity as OrderCoupon;
pub use product::Entity as Product;
pub use product_variant::Entity as ProductVariant;
