//! # Ledger Amounts
//!
//! All amounts handled by the bridge are integers in the ledger's smallest
//! unit (satoshis, 10^-8 GENIX). Floating point never touches an amount:
//! display strings are parsed digit by digit and rendered back the same way.
//!
//! On the wire amounts are decimal strings, so a JSON consumer with 53-bit
//! numbers cannot silently round them. The [`decimal`] module is the serde
//! adapter for that encoding.

use thiserror::Error;

/// Amount in the ledger's smallest unit.
pub type Satoshis = u128;

/// Number of decimal places in a display amount.
pub const DECIMALS: u32 = 8;

/// One GENIX in satoshis.
pub const COIN: Satoshis = 100_000_000;

/// Errors from parsing display amounts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("malformed amount: {0:?}")]
    Malformed(String),

    #[error("amount {0:?} has more than 8 decimal places")]
    TooPrecise(String),

    #[error("amount {0:?} is negative")]
    Negative(String),

    #[error("amount {0:?} overflows")]
    Overflow(String),
}

/// Converts a display amount (`"12.5"`, `"0.00000001"`, `"3"`, `"1e-5"`) into
/// satoshis. Rejects anything that cannot be represented exactly.
pub fn to_satoshi(display: &str) -> Result<Satoshis, AmountError> {
    let raw = display.trim();
    if raw.is_empty() {
        return Err(AmountError::Malformed(display.to_string()));
    }
    if raw.starts_with('-') {
        return Err(AmountError::Negative(display.to_string()));
    }
    let raw = raw.strip_prefix('+').unwrap_or(raw);

    // Split off a scientific exponent; serde_json renders some floats as `1e-5`.
    let (mantissa, exponent) = match raw.find(['e', 'E']) {
        Some(i) => {
            let exp: i32 = raw[i + 1..]
                .parse()
                .map_err(|_| AmountError::Malformed(display.to_string()))?;
            (&raw[..i], exp)
        }
        None => (raw, 0),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(AmountError::Malformed(display.to_string()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(AmountError::Malformed(display.to_string()));
    }

    // Digits as one integer, then shift by (DECIMALS + exponent - frac_len).
    let digits = format!("{}{}", int_part, frac_part);
    let shift = DECIMALS as i64 + exponent as i64 - frac_part.len() as i64;

    let mut value: Satoshis = 0;
    let trimmed = digits.trim_start_matches('0');
    for c in trimmed.chars() {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(c as Satoshis - '0' as Satoshis))
            .ok_or_else(|| AmountError::Overflow(display.to_string()))?;
    }

    if shift >= 0 {
        let factor = 10u128
            .checked_pow(shift as u32)
            .ok_or_else(|| AmountError::Overflow(display.to_string()))?;
        value
            .checked_mul(factor)
            .ok_or_else(|| AmountError::Overflow(display.to_string()))
    } else {
        let divisor = 10u128
            .checked_pow((-shift) as u32)
            .ok_or_else(|| AmountError::TooPrecise(display.to_string()))?;
        if value % divisor != 0 {
            return Err(AmountError::TooPrecise(display.to_string()));
        }
        Ok(value / divisor)
    }
}

/// Renders satoshis as a display amount with trailing zeros trimmed
/// (`150000000` → `"1.5"`, `100000000` → `"1"`).
pub fn from_satoshi(amount: Satoshis) -> String {
    let whole = amount / COIN;
    let frac = amount % COIN;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:08}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// Parses a ledger JSON amount, which may arrive as a number or a string.
pub fn from_json(value: &serde_json::Value) -> Result<Satoshis, AmountError> {
    match value {
        serde_json::Value::String(s) => to_satoshi(s),
        serde_json::Value::Number(n) => to_satoshi(&n.to_string()),
        other => Err(AmountError::Malformed(other.to_string())),
    }
}

/// Serde adapter encoding [`Satoshis`] as a decimal string of smallest units.
///
/// Accepts either a string or an integer from JSON. Binary formats always
/// carry the string form.
pub mod decimal {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    use super::Satoshis;

    pub fn serialize<S: Serializer>(value: &Satoshis, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Satoshis, D::Error> {
        struct DecimalVisitor;

        impl<'de> Visitor<'de> for DecimalVisitor {
            type Value = Satoshis;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer amount as a string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Satoshis, E> {
                v.parse::<Satoshis>()
                    .map_err(|_| E::custom(format!("invalid amount {:?}", v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Satoshis, E> {
                Ok(v as Satoshis)
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Satoshis, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Satoshis, E> {
                Satoshis::try_from(v).map_err(|_| E::custom("negative amount"))
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_any(DecimalVisitor)
        } else {
            deserializer.deserialize_str(DecimalVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(to_satoshi("1").unwrap(), COIN);
        assert_eq!(to_satoshi("12.5").unwrap(), 1_250_000_000);
        assert_eq!(to_satoshi("0.00000001").unwrap(), 1);
        assert_eq!(to_satoshi(".5").unwrap(), 50_000_000);
        assert_eq!(to_satoshi("0").unwrap(), 0);
    }

    #[test]
    fn parses_scientific_notation() {
        assert_eq!(to_satoshi("1e-5").unwrap(), 1_000);
        assert_eq!(to_satoshi("2.5E2").unwrap(), 250 * COIN);
    }

    #[test]
    fn rejects_sub_satoshi_precision() {
        assert!(matches!(
            to_satoshi("0.000000001"),
            Err(AmountError::TooPrecise(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(to_satoshi("abc"), Err(AmountError::Malformed(_))));
        assert!(matches!(to_satoshi(""), Err(AmountError::Malformed(_))));
        assert!(matches!(to_satoshi("."), Err(AmountError::Malformed(_))));
        assert!(matches!(to_satoshi("-1"), Err(AmountError::Negative(_))));
    }

    #[test]
    fn renders_trimmed_display_amounts() {
        assert_eq!(from_satoshi(COIN), "1");
        assert_eq!(from_satoshi(150_000_000), "1.5");
        assert_eq!(from_satoshi(1), "0.00000001");
        assert_eq!(from_satoshi(0), "0");
    }

    #[test]
    fn display_roundtrip_is_exact_for_large_values() {
        let big: Satoshis = 21_000_000 * COIN + 12_345_678;
        assert_eq!(to_satoshi(&from_satoshi(big)).unwrap(), big);
    }

    #[test]
    fn json_amounts_accept_numbers_and_strings() {
        assert_eq!(from_json(&serde_json::json!(0.5)).unwrap(), 50_000_000);
        assert_eq!(from_json(&serde_json::json!("3")).unwrap(), 3 * COIN);
        assert!(from_json(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn decimal_serde_uses_strings() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Holder {
            #[serde(with = "decimal")]
            amount: Satoshis,
        }

        let json = serde_json::to_string(&Holder { amount: 42 }).unwrap();
        assert_eq!(json, r#"{"amount":"42"}"#);
        let back: Holder = serde_json::from_str(r#"{"amount":7}"#).unwrap();
        assert_eq!(back.amount, 7);

        let big = Holder { amount: u128::MAX };
        let bytes = bincode::serialize(&big).unwrap();
        assert_eq!(bincode::deserialize::<Holder>(&bytes).unwrap(), big);
    }
}
