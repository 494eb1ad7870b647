//! Checked decimal arithmetic.
//!
//! `Decimal` operators panic when a result leaves the representable range
//! (about ±7.9e28). Every amount derived from feed values goes through the
//! helpers here instead, so an out-of-range result surfaces as an
//! [`Overflow`] naming the quantity being computed.
//!
//! Pro-rata shares ([`pro_rata`]) never exceed their input and are
//! infallible.

use rust_decimal::Decimal;

/// A decimal result fell outside the representable range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Overflow {
    /// What was being computed (`"cash"`, `"gross_pnl"`, ...).
    pub what: &'static str,
}

impl std::fmt::Display for Overflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decimal overflow computing {}", self.what)
    }
}

impl std::error::Error for Overflow {}

pub(crate) fn add(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, Overflow> {
    a.checked_add(b).ok_or(Overflow { what })
}

pub(crate) fn sub(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, Overflow> {
    a.checked_sub(b).ok_or(Overflow { what })
}

pub(crate) fn mul(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, Overflow> {
    a.checked_mul(b).ok_or(Overflow { what })
}

/// Also fails on a zero divisor.
pub(crate) fn div(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, Overflow> {
    a.checked_div(b).ok_or(Overflow { what })
}

pub(crate) fn sum<I>(values: I, what: &'static str) -> Result<Decimal, Overflow>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| add(acc, v, what))
}

/// `amount * part / whole`, the share of `amount` carried by `part` units.
///
/// Returns `amount` whole when `part >= whole`. The intermediate product is
/// only used when it fits; otherwise the ratio is taken first, which cannot
/// overflow since `part / whole < 1`.
pub(crate) fn pro_rata(amount: Decimal, part: Decimal, whole: Decimal) -> Decimal {
    if part >= whole || whole <= Decimal::ZERO {
        return amount;
    }
    match amount.checked_mul(part) {
        Some(scaled) => scaled / whole,
        None => amount * (part / whole),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn big() -> Decimal {
        Decimal::from_str("70000000000000000000000000000").unwrap()
    }

    #[test]
    fn checked_ops_name_the_quantity() {
        assert_eq!(mul(Decimal::from(3), Decimal::from(4), "x"), Ok(Decimal::from(12)));
        assert_eq!(mul(big(), Decimal::from(2), "cash"), Err(Overflow { what: "cash" }));
        assert_eq!(add(big(), big(), "equity"), Err(Overflow { what: "equity" }));
        assert_eq!(sub(-big(), big(), "pnl"), Err(Overflow { what: "pnl" }));
        assert_eq!(div(Decimal::ONE, Decimal::ZERO, "ratio"), Err(Overflow { what: "ratio" }));
        assert_eq!(
            Overflow { what: "cash" }.to_string(),
            "decimal overflow computing cash"
        );
    }

    #[test]
    fn sum_stops_at_first_overflow() {
        assert_eq!(sum([Decimal::ONE, Decimal::TWO], "s"), Ok(Decimal::from(3)));
        assert!(sum([big(), big(), -big()], "s").is_err());
    }

    #[test]
    fn pro_rata_shares_without_overflow() {
        let share = pro_rata(Decimal::ONE, Decimal::ONE, Decimal::from(4));
        assert_eq!(share, Decimal::new(25, 2));
        assert_eq!(pro_rata(Decimal::TEN, Decimal::from(5), Decimal::from(4)), Decimal::TEN);

        // amount * part alone would overflow; the share itself fits.
        let half = pro_rata(big(), Decimal::from(1_000), Decimal::from(2_000));
        assert_eq!(half, big() / Decimal::TWO);
    }
}
