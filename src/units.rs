//! Fixed-point units and big-integer helpers.
//!
//! Accounting runs on arbitrary-precision `BigUint`: the accumulator is scaled
//! by 10^36 and weights/final amounts by 10^18 ("ether"). Every division floors.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use num_bigint::BigUint;
use once_cell::sync::Lazy;

use crate::error::{Result, SnapshotError};

pub const SCALE_DECIMALS: u32 = 36;
pub const ETHER_DECIMALS: u32 = 18;

/// Accumulator / reward-debt scale (10^36).
pub static SCALE: Lazy<BigUint> = Lazy::new(|| pow10(SCALE_DECIMALS));
/// One whole token in base units (10^18).
pub static ETHER: Lazy<BigUint> = Lazy::new(|| pow10(ETHER_DECIMALS));

// Keeps a typo like "1e999999" from allocating a gigantic integer.
const MAX_DECIMAL_SHIFT: u64 = 256;

pub fn pow10(exp: u32) -> BigUint {
    BigUint::from(10u32).pow(exp)
}

/// Explicit zero for absent keys. Never relies on a default-on-miss map.
pub fn get_or_zero<K: Ord>(map: &BTreeMap<K, BigUint>, key: &K) -> BigUint {
    map.get(key).cloned().unwrap_or_default()
}

/// Converts a human decimal ("12500", "148266516.27", "1.28e9") into
/// 10^18 fixed-point, flooring any digits beyond 18 decimals.
pub fn parse_ether(input: &str) -> Result<BigUint> {
    parse_fixed(input, ETHER_DECIMALS)
}

/// Decimal string to `value * 10^decimals`, floor rounding, no floats.
pub fn parse_fixed(input: &str, decimals: u32) -> Result<BigUint> {
    let invalid = |reason: &'static str| SnapshotError::InvalidDecimal {
        input: input.to_string(),
        reason,
    };

    let text = input.trim();
    if text.is_empty() {
        return Err(invalid("empty"));
    }

    let (mantissa, exponent) = match text.find(|c: char| c == 'e' || c == 'E') {
        Some(pos) => {
            let exp = text[pos + 1..]
                .parse::<i64>()
                .map_err(|_| invalid("malformed exponent"))?;
            (&text[..pos], exp)
        }
        None => (text, 0),
    };

    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid("missing digits"));
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(invalid("expected only digits, '.' and an exponent"));
    }

    let digits = format!("{int_part}{frac_part}");
    let value = BigUint::parse_bytes(digits.as_bytes(), 10).ok_or_else(|| invalid("missing digits"))?;

    let shift = i64::try_from(frac_part.len())
        .ok()
        .and_then(|frac_len| i64::from(decimals).checked_add(exponent)?.checked_sub(frac_len))
        .filter(|shift| shift.unsigned_abs() <= MAX_DECIMAL_SHIFT)
        .ok_or_else(|| invalid("exponent out of range"))?;
    if shift >= 0 {
        Ok(value * pow10(shift as u32))
    } else {
        Ok(value / pow10(shift.unsigned_abs() as u32))
    }
}

pub fn u256_to_biguint(value: U256) -> BigUint {
    BigUint::from_bytes_be(&value.to_be_bytes::<32>())
}

/// `None` when the value needs more than 256 bits.
pub fn biguint_to_u256(value: &BigUint) -> Option<U256> {
    U256::try_from_be_slice(&value.to_bytes_be())
}

/// Parses a base-16 amount, with or without a `0x` prefix.
pub fn parse_hex_amount(text: &str) -> Option<BigUint> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
}

/// Serde adapter: `BigUint` as an unprefixed lower-case hex string.
pub mod hex_amount {
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(16))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_hex_amount(&text)
            .ok_or_else(|| D::Error::custom(format!("invalid hex amount {text:?}")))
    }
}

/// Serde adapter for `address -> hex amount` maps.
pub mod hex_amount_map {
    use std::collections::BTreeMap;

    use alloy_primitives::Address;
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<Address, BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(account, amount)| (account, amount.to_str_radix(16))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Address, BigUint>, D::Error> {
        let raw = BTreeMap::<Address, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(account, text)| {
                super::parse_hex_amount(&text)
                    .map(|amount| (account, amount))
                    .ok_or_else(|| D::Error::custom(format!("invalid hex amount {text:?} for {account}")))
            })
            .collect()
    }
}
