//! Persistence models.

pub mod activity_log;
pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod inventory_reservation;
pub mod order;
pub mod product_variant;

pub use activity_log::{Entity as ActivityLog, Model as ActivityLogModel};
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use coupon::{CouponType, Entity as Coupon, Model as CouponModel};
pub use inventory_reservation::{
    Entity as InventoryReservation, Model as InventoryReservationModel, ReservationStatus,
};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentStatus};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
