//! Domain services. Handlers stay thin and call into these.

pub mod activity;
pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod coupons;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod pricing;
