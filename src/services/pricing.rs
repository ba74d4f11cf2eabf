//! Order pricing.
//!
//! Everything here is a pure function of its inputs so an order's totals can
//! be recomputed from its snapshotted lines at any later time.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Flat tax rate applied to the pre-discount subtotal.
pub const TAX_RATE: Decimal = dec!(0.10);
/// Shipping charged when the subtotal is under [`FREE_SHIPPING_THRESHOLD`].
pub const SHIPPING_FEE: Decimal = dec!(10);
pub const FREE_SHIPPING_THRESHOLD: Decimal = dec!(100);

/// A cart line as seen by pricing: the price is the snapshot taken when the
/// line was added, never a live catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub variant_id: Uuid,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Priced line as stored on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderLine {
    pub variant_id: Uuid,
    pub sku: String,
    pub quantity: i32,
    pub price: Decimal,
    pub total: Decimal,
}

/// How a validated coupon reduces the subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountPolicy {
    Percentage {
        percent: Decimal,
        max_discount: Option<Decimal>,
    },
    Flat {
        amount: Decimal,
    },
}

impl DiscountPolicy {
    /// Discount for `subtotal`, never more than the subtotal itself.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let raw = match *self {
            DiscountPolicy::Percentage {
                percent,
                max_discount,
            } => {
                let amount = money(subtotal * percent / dec!(100));
                match max_discount {
                    Some(cap) if amount > cap => cap,
                    _ => amount,
                }
            }
            DiscountPolicy::Flat { amount } => amount,
        };
        raw.max(Decimal::ZERO).min(subtotal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdown {
    pub lines: Vec<OrderLine>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

impl PriceBreakdown {
    /// Total in the currency's smallest unit, truncating any fraction of a minor unit.
    pub fn total_minor_units(&self) -> Option<i64> {
        (self.total * dec!(100)).trunc().to_i64()
    }
}

/// Rounds to two decimal places, half away from zero.
pub fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn subtotal(items: &[LineItem]) -> Decimal {
    money(
        items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum(),
    )
}

pub fn tax_for(subtotal: Decimal) -> Decimal {
    money(subtotal * TAX_RATE)
}

pub fn shipping_for(subtotal: Decimal) -> Decimal {
    if subtotal < FREE_SHIPPING_THRESHOLD {
        SHIPPING_FEE
    } else {
        Decimal::ZERO
    }
}

/// Prices `items` with an optional, already validated, discount.
pub fn compute(items: &[LineItem], discount: Option<&DiscountPolicy>) -> PriceBreakdown {
    let lines: Vec<OrderLine> = items
        .iter()
        .map(|item| OrderLine {
            variant_id: item.variant_id,
            sku: item.sku.clone(),
            quantity: item.quantity,
            price: item.unit_price,
            total: money(item.unit_price * Decimal::from(item.quantity)),
        })
        .collect();

    let subtotal = subtotal(items);
    let discount = discount
        .map(|policy| policy.discount_for(subtotal))
        .unwrap_or(Decimal::ZERO);
    let tax = tax_for(subtotal);
    let shipping = shipping_for(subtotal);

    PriceBreakdown {
        lines,
        subtotal,
        discount,
        tax,
        shipping,
        total: subtotal - discount + tax + shipping,
    }
}
