//! Line and order totals.
//!
//! Uses rust_decimal for the arithmetic and hands back `f64` rounded to the
//! cent for storage.

use rust_decimal::prelude::*;

const DECIMAL_PLACES: u32 = 2;

#[inline]
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

#[inline]
pub fn to_f64(value: Decimal) -> f64 {
    round_money(value).to_f64().unwrap_or_default()
}

#[inline]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Priced cart line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinePrice {
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// `unit = (variation price or base price) + sum(option deltas)`,
/// `total = unit * quantity`.
pub fn price_line(
    base_price: f64,
    variation_price: Option<f64>,
    option_deltas: &[f64],
    quantity: i64,
) -> LinePrice {
    let start = to_decimal(variation_price.unwrap_or(base_price));
    let unit = option_deltas
        .iter()
        .fold(start, |acc, delta| acc + to_decimal(*delta));
    let unit_price = round_money(unit);
    LinePrice {
        unit_price,
        total_price: round_money(unit_price * Decimal::from(quantity)),
    }
}

/// Sum of line totals.
pub fn order_total(lines: &[LinePrice]) -> Decimal {
    round_money(lines.iter().map(|l| l.total_price).sum())
}

/// Change due for a cash payment, never negative.
pub fn change_due(total: Decimal, received: Decimal) -> Decimal {
    round_money((received - total).max(Decimal::ZERO))
}
