//! Locale-formatted amount strings to exact minor units.
//!
//! Typical registry values: `"1,000,000.00"`, `"$1,250.5"`,
//! `"-300"`. Separators come from [`AmountFormat`]; nothing is inferred
//! from the string itself, so `"1.000"` is one thousand only when `.` is the
//! configured thousands separator.

use procura_core::money::MINOR_PER_MAJOR;
use thiserror::Error;

use crate::config::AmountFormat;

const MAX_FRACTION_DIGITS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountParseError {
    #[error("empty amount")]
    Empty,

    #[error("malformed amount '{0}'")]
    Malformed(String),

    #[error("amount '{0}' has more than two fractional digits")]
    TooPrecise(String),

    #[error("amount '{0}' is out of range")]
    Overflow(String),
}

/// Parse an amount into signed minor units.
pub fn parse_amount(input: &str, format: &AmountFormat) -> Result<i64, AmountParseError> {
    let original = input.trim();
    if original.is_empty() {
        return Err(AmountParseError::Empty);
    }
    let malformed = || AmountParseError::Malformed(original.to_string());

    let (negative, rest) = strip_sign(original);
    let rest = rest.strip_prefix('$').map(str::trim_start).unwrap_or(rest);
    // `$-5.00` puts the sign after the symbol.
    let (negative, rest) = if negative {
        (true, rest)
    } else {
        strip_sign(rest)
    };
    if rest.is_empty() {
        return Err(malformed());
    }

    let mut halves = rest.split(format.decimal_separator);
    let integer = halves.next().unwrap_or_default();
    let fraction = halves.next();
    if halves.next().is_some() {
        return Err(malformed());
    }

    let major = parse_integer_part(integer, format.thousands_separator).ok_or_else(malformed)?;
    let minor = match fraction {
        None => 0,
        Some("") => return Err(malformed()),
        Some(f) if !f.bytes().all(|b| b.is_ascii_digit()) => return Err(malformed()),
        Some(f) if f.len() > MAX_FRACTION_DIGITS => {
            return Err(AmountParseError::TooPrecise(original.to_string()));
        }
        Some(f) => {
            let digits: i64 = f.parse().map_err(|_| malformed())?;
            if f.len() == 1 { digits * 10 } else { digits }
        }
    };

    let overflow = || AmountParseError::Overflow(original.to_string());
    let total = major
        .checked_mul(MINOR_PER_MAJOR)
        .and_then(|m| m.checked_add(minor))
        .ok_or_else(overflow)?;
    Ok(if negative { -total } else { total })
}

fn strip_sign(s: &str) -> (bool, &str) {
    if let Some(rest) = s.strip_prefix('-') {
        (true, rest.trim_start())
    } else if let Some(rest) = s.strip_prefix('+') {
        (false, rest.trim_start())
    } else {
        (false, s)
    }
}

/// Digits with optional well-formed thousands grouping (`1,234,567`).
/// An empty integer part (`.50`) reads as zero.
fn parse_integer_part(s: &str, thousands: char) -> Option<i64> {
    if s.is_empty() {
        return Some(0);
    }
    let groups: Vec<&str> = s.split(thousands).collect();
    let all_digits = |g: &str| !g.is_empty() && g.bytes().all(|b| b.is_ascii_digit());
    if groups.len() > 1 {
        let first_ok = all_digits(groups[0]) && groups[0].len() <= 3;
        let rest_ok = groups[1..].iter().all(|g| all_digits(g) && g.len() == 3);
        if !(first_ok && rest_ok) {
            return None;
        }
    } else if !all_digits(s) {
        return None;
    }
    groups.concat().parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn us(s: &str) -> Result<i64, AmountParseError> {
        parse_amount(s, &AmountFormat::default())
    }

    fn eu(s: &str) -> Result<i64, AmountParseError> {
        let format = AmountFormat {
            thousands_separator: '.',
            decimal_separator: ',',
        };
        parse_amount(s, &format)
    }

    #[test]
    fn grouped_amounts() {
        assert_eq!(us("1,000.00").unwrap(), 100_000);
        assert_eq!(us("1,000,000.00").unwrap(), 100_000_000);
        assert_eq!(us("999").unwrap(), 99_900);
    }

    #[test]
    fn symbols_and_signs() {
        assert_eq!(us("$1,250.50").unwrap(), 125_050);
        assert_eq!(us("$ 10").unwrap(), 1_000);
        assert_eq!(us("-300").unwrap(), -30_000);
        assert_eq!(us("-$5.00").unwrap(), -500);
        assert_eq!(us("$-5.00").unwrap(), -500);
        assert_eq!(us("+7").unwrap(), 700);
    }

    #[test]
    fn fractional_digits() {
        assert_eq!(us("12.5").unwrap(), 1_250);
        assert_eq!(us(".05").unwrap(), 5);
        assert!(matches!(us("1.005"), Err(AmountParseError::TooPrecise(_))));
        assert!(matches!(us("1."), Err(AmountParseError::Malformed(_))));
    }

    #[test]
    fn configured_separators() {
        assert_eq!(eu("1.000,00").unwrap(), 100_000);
        assert_eq!(eu("1.000").unwrap(), 100_000);
        // Under US separators the same string carries three fractional digits.
        assert_eq!(us("1.000"), Err(AmountParseError::TooPrecise("1.000".into())));
    }

    #[test]
    fn malformed_grouping() {
        assert!(matches!(us("1,00,000"), Err(AmountParseError::Malformed(_))));
        assert!(matches!(us("1000,00"), Err(AmountParseError::Malformed(_))));
        assert!(matches!(us(",100"), Err(AmountParseError::Malformed(_))));
    }

    #[test]
    fn garbage() {
        assert_eq!(us("   "), Err(AmountParseError::Empty));
        assert!(matches!(us("abc"), Err(AmountParseError::Malformed(_))));
        assert!(matches!(us("1e6"), Err(AmountParseError::Malformed(_))));
        assert!(matches!(us("$"), Err(AmountParseError::Malformed(_))));
        assert!(matches!(us("1.2.3"), Err(AmountParseError::Malformed(_))));
    }

    #[test]
    fn overflow() {
        assert!(matches!(
            us("999999999999999999999"),
            Err(AmountParseError::Malformed(_)) | Err(AmountParseError::Overflow(_))
        ));
        assert!(matches!(
            us("92233720368547758.08"),
            Err(AmountParseError::Overflow(_))
        ));
    }
}
