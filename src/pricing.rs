//! Pricing table for token issuance.
//!
//! Pricing *policy* is external to this core — this is just the fixed lookup
//! the Token Authority charges by. Prices are total over the (duration,
//! scope) enums: invalid combinations cannot be constructed, so validation
//! happens at the parse boundary, not here.

use rust_decimal::Decimal;

use crate::models::token::{Scope, TokenDuration};

/// Price for one token of the given duration and scope, at balance scale
/// (two decimal places).
pub fn price(duration: TokenDuration, scope: Scope) -> Decimal {
    base_cents(duration) * scope_multiplier(scope) / Decimal::ONE_HUNDRED
}

fn base_cents(duration: TokenDuration) -> Decimal {
    Decimal::from(match duration {
        TokenDuration::Hour => 150u32,
        TokenDuration::Day => 1200,
        TokenDuration::Week => 6000,
        TokenDuration::Month => 18000,
    })
}

fn scope_multiplier(scope: Scope) -> Decimal {
    match scope {
        Scope::Http => Decimal::new(100, 2),  // 1.00
        Scope::Socks => Decimal::new(125, 2), // 1.25
        Scope::Full => Decimal::new(150, 2),  // 1.50
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_values() {
        assert_eq!(price(TokenDuration::Hour, Scope::Http), Decimal::new(150, 2));
        assert_eq!(price(TokenDuration::Day, Scope::Http), Decimal::new(1200, 2));
        assert_eq!(price(TokenDuration::Day, Scope::Full), Decimal::new(1800, 2));
        assert_eq!(price(TokenDuration::Week, Scope::Socks), Decimal::new(7500, 2));
        assert_eq!(price(TokenDuration::Month, Scope::Full), Decimal::new(27000, 2));
    }

    #[test]
    fn prices_have_no_sub_cent_component() {
        for d in [
            TokenDuration::Hour,
            TokenDuration::Day,
            TokenDuration::Week,
            TokenDuration::Month,
        ] {
            for s in [Scope::Http, Scope::Socks, Scope::Full] {
                let p = price(d, s);
                assert!(p > Decimal::ZERO);
                assert_eq!(p, p.trunc_with_scale(2), "price {} is not whole cents", p);
            }
        }
    }
}
