//! Exact money values in integer minor units.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of minor units per major unit (cents per dollar).
pub const MINOR_PER_MAJOR: i64 = 100;

/// Currency every registry amount is denominated in unless configured otherwise.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Three ASCII uppercase letters, the shape of an ISO 4217 code.
pub fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// A monetary amount: signed minor units plus an ISO 4217 currency code.
///
/// Arithmetic is exact; there is no floating-point path. Values of different
/// currencies are never summed together (see [`Money::checked_add`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money {
    pub minor: i64,
    pub currency: String,
}

impl Money {
    pub fn new(minor: i64, currency: impl Into<String>) -> Self {
        Self {
            minor,
            currency: currency.into(),
        }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(0, currency)
    }

    /// True for strictly positive amounts. Zero and negative values are never
    /// valid procurement values.
    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    /// Sum two amounts of the same currency. Returns `None` on currency
    /// mismatch or i64 overflow.
    pub fn checked_add(&self, other: &Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        Some(Money::new(self.minor.checked_add(other.minor)?, self.currency.clone()))
    }

    /// Divide by a count, rounding half away from zero to the nearest minor unit.
    pub fn div_round(&self, count: u64) -> Option<Money> {
        if count == 0 {
            return None;
        }
        let n = i128::from(self.minor);
        let d = i128::from(count);
        let q = n / d;
        let r = n % d;
        let rounded = if 2 * r.abs() >= d {
            q + n.signum()
        } else {
            q
        };
        Some(Money::new(i64::try_from(rounded).ok()?, self.currency.clone()))
    }

    /// Amount as a plain decimal string without grouping, e.g. `"-1234.50"`.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        let major = abs / MINOR_PER_MAJOR as u64;
        let minor = abs % MINOR_PER_MAJOR as u64;
        format!("{sign}{major}.{minor:02}")
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_code_shape() {
        assert!(is_currency_code("USD"));
        assert!(!is_currency_code("usd"));
        assert!(!is_currency_code("US"));
        assert!(!is_currency_code("US$"));
        assert!(!is_currency_code("DÓL"));
    }

    #[test]
    fn decimal_string() {
        assert_eq!(Money::new(100_000, "USD").to_decimal_string(), "1000.00");
        assert_eq!(Money::new(5, "USD").to_decimal_string(), "0.05");
        assert_eq!(Money::new(-50_025, "USD").to_decimal_string(), "-500.25");
        assert_eq!(Money::zero("USD").to_decimal_string(), "0.00");
    }

    #[test]
    fn display_includes_currency() {
        assert_eq!(Money::new(123_456, "USD").to_string(), "1234.56 USD");
    }

    #[test]
    fn add_same_currency() {
        let a = Money::new(150, "USD");
        let b = Money::new(275, "USD");
        assert_eq!(a.checked_add(&b), Some(Money::new(425, "USD")));
    }

    #[test]
    fn add_refuses_mixed_currency() {
        let a = Money::new(150, "USD");
        let b = Money::new(275, "EUR");
        assert_eq!(a.checked_add(&b), None);
    }

    #[test]
    fn add_overflow() {
        let a = Money::new(i64::MAX, "USD");
        assert_eq!(a.checked_add(&Money::new(1, "USD")), None);
    }

    #[test]
    fn div_round_half_away_from_zero() {
        assert_eq!(Money::new(10, "USD").div_round(4).unwrap().minor, 3); // 2.5 -> 3
        assert_eq!(Money::new(10, "USD").div_round(3).unwrap().minor, 3); // 3.33 -> 3
        assert_eq!(Money::new(-10, "USD").div_round(4).unwrap().minor, -3);
        assert_eq!(Money::new(200_000, "USD").div_round(2).unwrap().minor, 100_000);
    }

    #[test]
    fn div_by_zero_is_none() {
        assert!(Money::new(10, "USD").div_round(0).is_none());
    }

    #[test]
    fn positivity() {
        assert!(Money::new(1, "USD").is_positive());
        assert!(!Money::zero("USD").is_positive());
        assert!(!Money::new(-1, "USD").is_positive());
    }
}
