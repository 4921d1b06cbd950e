//! Pure pricing arithmetic shared by cart display, checkout and refunds.
//!
//! Proration lives here and nowhere else: the per-line discount share
//! computed at checkout is the exact amount later subtracted from a line's
//! refund, so every path that touches money agrees by construction.

use crate::entities::coupon::CouponType;
use rust_decimal::Decimal;

/// Effective price for a variant: the cheaper of the sale price and the
/// list price with the product-level offer applied, floored at zero.
pub fn effective_unit_price(price: Decimal, sale_price: Decimal, offer_percent: Decimal) -> Decimal {
    let offer_price = price * (Decimal::ONE_HUNDRED - offer_percent) / Decimal::ONE_HUNDRED;
    sale_price.min(offer_price).max(Decimal::ZERO).round_dp(2)
}

/// Discount for a coupon against a cart subtotal.
///
/// Percentage coupons take `subtotal * value / 100`, capped by
/// `max_discount` when set. Fixed coupons take `min(value, subtotal)`.
/// The result never exceeds the subtotal.
pub fn coupon_discount(
    discount_type: CouponType,
    value: Decimal,
    max_discount: Option<Decimal>,
    subtotal: Decimal,
) -> Decimal {
    let raw = match discount_type {
        CouponType::Percentage => {
            let pct = subtotal * value / Decimal::ONE_HUNDRED;
            match max_discount {
                Some(cap) => pct.min(cap),
                None => pct,
            }
        }
        CouponType::Fixed => value,
    };
    raw.min(subtotal).max(Decimal::ZERO).round_dp(2)
}

/// A single line's share of an order-level discount:
/// `(line_subtotal / order_subtotal) * total_discount`, rounded to cents.
pub fn prorate(line_subtotal: Decimal, order_subtotal: Decimal, total_discount: Decimal) -> Decimal {
    if order_subtotal.is_zero() {
        return Decimal::ZERO;
    }
    (line_subtotal / order_subtotal * total_discount).round_dp(2)
}

/// Prorates a discount across all lines. The last line absorbs the
/// rounding remainder so the shares always sum to exactly the discount.
pub fn prorate_lines(line_totals: &[Decimal], total_discount: Decimal) -> Vec<Decimal> {
    if line_totals.is_empty() || total_discount.is_zero() {
        return vec![Decimal::ZERO; line_totals.len()];
    }
    let order_subtotal: Decimal = line_totals.iter().copied().sum();
    let mut shares = Vec::with_capacity(line_totals.len());
    let mut allocated = Decimal::ZERO;
    for (idx, line) in line_totals.iter().enumerate() {
        let share = if idx + 1 == line_totals.len() {
            total_discount - allocated
        } else {
            prorate(*line, order_subtotal, total_discount)
        };
        allocated += share;
        shares.push(share);
    }
    shares
}

/// Flat-rate shipping with a free-shipping threshold. The threshold is
/// checked against the pre-discount goods subtotal, so a coupon never
/// changes what shipping costs. Empty carts ship free.
pub fn shipping_charge(subtotal: Decimal, flat_rate: Decimal, free_threshold: Decimal) -> Decimal {
    if subtotal.is_zero() || subtotal >= free_threshold {
        Decimal::ZERO
    } else {
        flat_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn effective_price_prefers_cheaper_of_sale_and_offer() {
        // 20% offer beats the sale price here
        assert_eq!(
            effective_unit_price(dec!(100), dec!(90), dec!(20)),
            dec!(80)
        );
        // sale price beats a 5% offer
        assert_eq!(
            effective_unit_price(dec!(100), dec!(90), dec!(5)),
            dec!(90)
        );
        // no offer, no sale markdown
        assert_eq!(
            effective_unit_price(dec!(50), dec!(50), dec!(0)),
            dec!(50)
        );
    }

    #[test]
    fn percentage_discount_basic() {
        let d = coupon_discount(CouponType::Percentage, dec!(10), None, dec!(2000));
        assert_eq!(d, dec!(200));
    }

    #[test]
    fn percentage_discount_respects_cap_regardless_of_subtotal() {
        let d = coupon_discount(CouponType::Percentage, dec!(50), Some(dec!(75)), dec!(1000000));
        assert_eq!(d, dec!(75));
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        assert_eq!(
            coupon_discount(CouponType::Fixed, dec!(500), None, dec!(120)),
            dec!(120)
        );
        assert_eq!(
            coupon_discount(CouponType::Fixed, dec!(50), None, dec!(120)),
            dec!(50)
        );
    }

    #[test]
    fn discount_is_idempotent_for_same_inputs() {
        let a = coupon_discount(CouponType::Percentage, dec!(12.5), Some(dec!(40)), dec!(310));
        let b = coupon_discount(CouponType::Percentage, dec!(12.5), Some(dec!(40)), dec!(310));
        assert_eq!(a, b);
    }

    #[test]
    fn prorate_reference_scenario() {
        // cart 2000 = line A (1000x1) + line B (500x2), 10% coupon -> 200.
        // Line A's share is 100, so its refund is 1000 - 100 = 900.
        let share_a = prorate(dec!(1000), dec!(2000), dec!(200));
        assert_eq!(share_a, dec!(100));
        assert_eq!(dec!(1000) - share_a, dec!(900));
    }

    #[test]
    fn prorate_zero_subtotal_is_zero() {
        assert_eq!(prorate(dec!(0), dec!(0), dec!(100)), dec!(0));
    }

    #[test]
    fn prorate_lines_sum_exactly_to_discount() {
        // Three equal lines with an indivisible discount
        let shares = prorate_lines(&[dec!(10), dec!(10), dec!(10)], dec!(10));
        let total: Decimal = shares.iter().copied().sum();
        assert_eq!(total, dec!(10));
        assert_eq!(shares[0], dec!(3.33));
        assert_eq!(shares[1], dec!(3.33));
        assert_eq!(shares[2], dec!(3.34));
    }

    #[test]
    fn prorate_lines_zero_discount() {
        assert_eq!(
            prorate_lines(&[dec!(10), dec!(20)], dec!(0)),
            vec![dec!(0), dec!(0)]
        );
    }

    #[test]
    fn shipping_free_at_threshold_and_for_empty_carts() {
        assert_eq!(shipping_charge(dec!(50), dec!(10), dec!(50)), dec!(0));
        assert_eq!(shipping_charge(dec!(49.99), dec!(10), dec!(50)), dec!(10));
        assert_eq!(shipping_charge(dec!(0), dec!(10), dec!(50)), dec!(0));
    }

    proptest! {
        #[test]
        fn prorated_shares_are_bounded_and_sum(
            lines in prop::collection::vec(1u32..10_000, 1..8),
            discount_pct in 0u32..=100,
        ) {
            let line_totals: Vec<Decimal> =
                lines.iter().map(|&c| Decimal::from(c)).collect();
            let subtotal: Decimal = line_totals.iter().copied().sum();
            let discount = (subtotal * Decimal::from(discount_pct)
                / Decimal::ONE_HUNDRED).round_dp(2);

            let shares = prorate_lines(&line_totals, discount);
            let sum: Decimal = shares.iter().copied().sum();
            prop_assert_eq!(sum, discount);
            for share in &shares {
                prop_assert!(*share >= Decimal::ZERO);
            }
            // no line refunds below zero after subtracting its share
            for (line, share) in line_totals.iter().zip(&shares) {
                prop_assert!(line - share >= Decimal::ZERO);
            }
        }
    }
}
