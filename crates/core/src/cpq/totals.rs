use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::{QuoteLine, QuoteTotals};
use crate::errors::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub final_subtotal: Decimal,
}

pub fn compute_line(
    unit_price: Decimal,
    quantity: Decimal,
    discount_amount: Decimal,
) -> Result<LineAmounts, EngineError> {
    if quantity <= Decimal::ZERO {
        return Err(EngineError::InvalidInput(format!("quantity must be > 0, got {quantity}")));
    }
    let subtotal = unit_price * quantity;
    if discount_amount < Decimal::ZERO || discount_amount > subtotal {
        return Err(EngineError::InvalidInput(format!(
            "discount amount {discount_amount} must be within [0, {subtotal}]"
        )));
    }

    Ok(LineAmounts { subtotal, discount_amount, final_subtotal: subtotal - discount_amount })
}

/// `total = sum(subtotal)`, `discount = sum(discount)`,
/// `final = sum(final_subtotal) + shipping`.
pub fn compute_order_totals(lines: &[QuoteLine], shipping_amount: Decimal) -> QuoteTotals {
    let (total_amount, total_discount, final_lines) = lines.iter().fold(
        (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
        |(total, discount, final_total), line| {
            (
                total + line.subtotal,
                discount + line.discount_amount,
                final_total + line.final_subtotal,
            )
        },
    );

    QuoteTotals { total_amount, total_discount, final_total: final_lines + shipping_amount }
}
