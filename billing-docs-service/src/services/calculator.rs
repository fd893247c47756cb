//! Line-item and document totals.
//!
//! Pure arithmetic over `Decimal`; callers validate inputs first. Per line:
//!
//! 1. `gross = quantity * unit_price`
//! 2. `net = gross - discount` (flat amount, may go negative)
//! 3. `tax = net * rate / 100`
//! 4. `total = net + tax`
//! 5. net, tax and total are rounded to cents, half away from zero.
//!
//! Document tax is recomputed from the summed line nets, so it can differ
//! from the sum of the line taxes by a cent or two.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Amount-bearing part of a line.
#[derive(Debug, Clone, Copy)]
pub struct LineInput {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
}

/// Rounded amounts for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineAmounts {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Document-level aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computation {
    pub lines: Vec<LineAmounts>,
    pub totals: Totals,
}

/// Round to two decimals, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn compute_line(line: &LineInput, tax_rate: Decimal) -> LineAmounts {
    let gross = line.quantity * line.unit_price;
    let net = gross - line.discount;
    let tax = net * tax_rate / HUNDRED;
    let total = net + tax;

    LineAmounts {
        subtotal: round_money(net),
        tax: round_money(tax),
        total: round_money(total),
    }
}

/// Largest sum of line gross amounts, or of line discounts, on one document.
///
/// With a tax rate of at most 100% every computed amount stays below
/// 4 * 10^15, well inside the NUMERIC(20, 2) money columns.
pub fn max_document_amount() -> Decimal {
    Decimal::new(1_000_000_000_000_000, 0)
}

/// Whether `compute` stays within `max_document_amount` for these lines.
/// Never panics, whatever the magnitudes.
pub fn within_bounds(lines: &[LineInput]) -> bool {
    let limit = max_document_amount();
    let mut gross_sum = Decimal::ZERO;
    let mut discount_sum = Decimal::ZERO;

    for line in lines {
        let Some(gross) = line.quantity.checked_mul(line.unit_price) else {
            return false;
        };
        gross_sum = match gross_sum.checked_add(gross.abs()) {
            Some(sum) if sum <= limit => sum,
            _ => return false,
        };
        discount_sum = match discount_sum.checked_add(line.discount.abs()) {
            Some(sum) if sum <= limit => sum,
            _ => return false,
        };
    }
    true
}

/// Compute line amounts and document totals for `tax_rate` percent.
///
/// Inputs must pass `within_bounds` and the rate must lie in [0, 100].
pub fn compute(lines: &[LineInput], tax_rate: Decimal) -> Computation {
    let amounts: Vec<LineAmounts> = lines.iter().map(|l| compute_line(l, tax_rate)).collect();

    let subtotal: Decimal = amounts.iter().map(|a| a.subtotal).sum();
    let discount: Decimal = lines.iter().map(|l| l.discount).sum();
    let tax = round_money(subtotal * tax_rate / HUNDRED);
    let total = round_money(subtotal + tax);

    Computation {
        lines: amounts,
        totals: Totals {
            subtotal,
            discount: round_money(discount),
            tax,
            total,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal_macros::dec;

    fn line(quantity: Decimal, unit_price: Decimal, discount: Decimal) -> LineInput {
        LineInput {
            quantity,
            unit_price,
            discount,
        }
    }

    #[test]
    fn two_units_at_eighteen_percent() {
        let result = compute(&[line(dec!(2), dec!(100), dec!(0))], dec!(18));

        assert_eq!(
            result.lines[0],
            LineAmounts {
                subtotal: dec!(200.00),
                tax: dec!(36.00),
                total: dec!(236.00),
            }
        );
        assert_eq!(result.totals.subtotal, dec!(200.00));
        assert_eq!(result.totals.tax, dec!(36.00));
        assert_eq!(result.totals.total, dec!(236.00));
        assert_eq!(result.totals.discount, dec!(0));
    }

    #[test]
    fn document_tax_is_taken_from_aggregated_subtotal() {
        let lines = vec![line(dec!(1), dec!(0.03), dec!(0)); 3];
        let result = compute(&lines, dec!(18));

        let line_tax_sum: Decimal = result.lines.iter().map(|l| l.tax).sum();
        assert_eq!(line_tax_sum, dec!(0.03));
        assert_eq!(result.totals.subtotal, dec!(0.09));
        assert_eq!(result.totals.tax, dec!(0.02));
        assert_eq!(result.totals.total, dec!(0.11));
    }

    #[test]
    fn midpoint_rounds_away_from_zero() {
        assert_eq!(round_money(dec!(0.125)), dec!(0.13));
        assert_eq!(round_money(dec!(-0.125)), dec!(-0.13));
        assert_eq!(round_money(dec!(0.124999)), dec!(0.12));

        let result = compute(&[line(dec!(1), dec!(0.125), dec!(0))], dec!(0));
        assert_eq!(result.lines[0].subtotal, dec!(0.13));
        assert_eq!(result.totals.total, dec!(0.13));
    }

    #[test]
    fn discount_larger_than_gross_goes_negative() {
        let result = compute(&[line(dec!(1), dec!(5), dec!(10))], dec!(18));

        assert_eq!(result.lines[0].subtotal, dec!(-5.00));
        assert_eq!(result.lines[0].tax, dec!(-0.90));
        assert_eq!(result.lines[0].total, dec!(-5.90));
        assert_eq!(result.totals.discount, dec!(10));
        assert_eq!(result.totals.total, dec!(-5.90));
    }

    #[test]
    fn zero_rate_has_no_tax() {
        let result = compute(
            &[
                line(dec!(3), dec!(9.99), dec!(0.97)),
                line(dec!(0.5), dec!(20), dec!(0)),
            ],
            dec!(0),
        );

        assert_eq!(result.totals.subtotal, dec!(39.00));
        assert_eq!(result.totals.tax, dec!(0));
        assert_eq!(result.totals.total, result.totals.subtotal);
        assert!(result.lines.iter().all(|l| l.tax.is_zero()));
    }

    #[test]
    fn fractional_quantities_and_rates() {
        // 1.5 * 33.3333 = 49.99995 -> 50.00; tax 7.5% = 3.74999625 -> 3.75
        let result = compute(&[line(dec!(1.5), dec!(33.3333), dec!(0))], dec!(7.5));

        assert_eq!(result.lines[0].subtotal, dec!(50.00));
        assert_eq!(result.lines[0].tax, dec!(3.75));
        assert_eq!(result.lines[0].total, dec!(53.75));
        assert_eq!(result.totals.tax, dec!(3.75));
    }

    #[test]
    fn oversized_documents_are_out_of_bounds() {
        let huge = dec!(1000000000000);
        assert!(!within_bounds(&[line(huge, huge, dec!(0))]));
        assert!(!within_bounds(&[
            line(dec!(1), dec!(1), dec!(50000000000000000000000000000)),
            line(dec!(1), dec!(1), dec!(50000000000000000000000000000)),
        ]));
        assert!(!within_bounds(&[line(
            dec!(79228162514264337593543950335),
            dec!(10),
            dec!(0)
        )]));
        assert!(!within_bounds(&vec![
            line(dec!(1000), dec!(1000000000000), dec!(0));
            2
        ]));
    }

    #[test]
    fn largest_bounded_document_computes_within_money_columns() {
        let column_limit = dec!(1000000000000000000);
        let mut lines = vec![line(dec!(999), dec!(1000000000000), dec!(0))];
        lines.extend(vec![line(dec!(0.0001), dec!(0.0001), dec!(1000000000000)); 499]);
        assert!(within_bounds(&lines));

        let result = compute(&lines, dec!(100));

        assert_eq!(result.totals.subtotal, dec!(500000000000000.00));
        assert_eq!(result.totals.discount, dec!(499000000000000));
        assert!(result.totals.total.abs() < column_limit);
        assert!(result.totals.tax.abs() < column_limit);
        assert!(result.lines.iter().all(|l| l.total.abs() < column_limit));
    }

    #[test]
    fn aggregates_hold_for_random_documents() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..500 {
            let count = rng.gen_range(1..=20);
            let lines: Vec<LineInput> = (0..count)
                .map(|_| {
                    line(
                        Decimal::new(rng.gen_range(1..=100_000), 2),
                        Decimal::new(rng.gen_range(1..=10_000_000), 4),
                        Decimal::new(rng.gen_range(0..=5_000), 2),
                    )
                })
                .collect();
            let rate = Decimal::new(rng.gen_range(0..=250_000), 4);

            let result = compute(&lines, rate);

            let line_sum: Decimal = result.lines.iter().map(|l| l.subtotal).sum();
            assert_eq!(result.totals.subtotal, line_sum);
            assert_eq!(
                result.totals.tax,
                round_money(result.totals.subtotal * rate / dec!(100))
            );
            assert_eq!(
                result.totals.total,
                result.totals.subtotal + result.totals.tax
            );
            assert!(result.totals.total.scale() <= 2);

            for amounts in &result.lines {
                let drift = (amounts.total - (amounts.subtotal + amounts.tax)).abs();
                assert!(drift <= dec!(0.01), "line total drifted by {}", drift);
            }
        }
    }
}
