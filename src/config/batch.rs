//! Airdrop batch and token set configuration.

use std::collections::HashSet;
use std::fmt;

use alloy_primitives::Address;
use num_bigint::BigUint;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SnapshotError};
use crate::units::parse_ether;

/// Inclusive block range of a snapshot window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    pub start: u64,
    pub end: u64,
}

impl Timeframe {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

/// A human-entered decimal ("12500", "1.28e9") kept as text until it is
/// converted to 10^18 fixed-point.
///
/// Deserializes from strings or integers. Floats are refused: a TOML float has
/// already lost precision by the time we would see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DecimalAmount(String);

impl DecimalAmount {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value scaled to 10^18, floored.
    pub fn to_fixed(&self) -> Result<BigUint> {
        parse_ether(&self.0)
    }
}

impl From<&str> for DecimalAmount {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<u64> for DecimalAmount {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DecimalAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DecimalAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DecimalVisitor;

        impl<'de> Visitor<'de> for DecimalVisitor {
            type Value = DecimalAmount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or a non-negative integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                Ok(DecimalAmount::new(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                Ok(DecimalAmount::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                u64::try_from(v)
                    .map(DecimalAmount::from)
                    .map_err(|_| E::custom(format!("negative amount {v}")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
                Err(E::custom(format!(
                    "float {v} is not accepted, write fractional amounts as strings (\"{v}\")"
                )))
            }
        }

        deserializer.deserialize_any(DecimalVisitor)
    }
}

/// One token pool inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub address: Address,
    pub weight: DecimalAmount,
    /// Block of the token's creation; replay never starts earlier.
    pub created_at: u64,
}

/// A named group of token pools sharing one airdrop amount and timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub id: String,
    /// Total airdrop for the batch, in whole tokens.
    pub airdrop: DecimalAmount,
    pub timeframe: Timeframe,
    pub tokens: Vec<TokenConfig>,
    /// Wallets excluded from accounting entirely (farms, routers).
    #[serde(default)]
    pub ignore_addresses: Vec<Address>,
    /// Wallets that accrue but are dropped from the payout.
    #[serde(default)]
    pub remove_addresses: Vec<Address>,
}

impl BatchConfig {
    pub fn airdrop_amount(&self) -> Result<BigUint> {
        self.airdrop.to_fixed()
    }

    /// Tokens created after the batch window closed; they can have no
    /// transfers inside it.
    pub fn out_of_bounds_tokens(&self) -> Vec<Address> {
        self.tokens
            .iter()
            .filter(|t| t.created_at > self.timeframe.end)
            .map(|t| t.address)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| SnapshotError::InvalidConfig(format!("batch {}: {}", self.id, msg));

        if self.id.trim().is_empty() {
            return Err(SnapshotError::InvalidConfig("batch with empty id".to_string()));
        }
        if self.timeframe.start > self.timeframe.end {
            return Err(invalid(format!(
                "timeframe start {} is after end {}",
                self.timeframe.start, self.timeframe.end
            )));
        }
        if self.tokens.is_empty() {
            return Err(invalid("no tokens configured".to_string()));
        }
        self.airdrop_amount()?;

        let mut seen = HashSet::new();
        for token in &self.tokens {
            if !seen.insert(token.address) {
                return Err(invalid(format!("token {} listed twice", token.address)));
            }
            token.weight.to_fixed()?;
        }

        let out_of_bounds = self.out_of_bounds_tokens();
        if !out_of_bounds.is_empty() {
            let list: Vec<String> = out_of_bounds.iter().map(Address::to_string).collect();
            return Err(invalid(format!(
                "tokens created after timeframe end {}: {}",
                self.timeframe.end,
                list.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::ETHER;

    fn batch() -> BatchConfig {
        BatchConfig {
            id: "curve".to_string(),
            airdrop: "3334".into(),
            timeframe: Timeframe::new(100, 200),
            tokens: vec![
                TokenConfig {
                    address: Address::repeat_byte(1),
                    weight: "391358563.15".into(),
                    created_at: 50,
                },
                TokenConfig {
                    address: Address::repeat_byte(2),
                    weight: 11696005u64.into(),
                    created_at: 150,
                },
            ],
            ignore_addresses: vec![],
            remove_addresses: vec![],
        }
    }

    #[test]
    fn test_valid_batch() {
        let b = batch();
        b.validate().unwrap();
        assert_eq!(b.airdrop_amount().unwrap(), BigUint::from(3334u32) * &*ETHER);
    }

    #[test]
    fn test_out_of_bounds_token_rejected() {
        let mut b = batch();
        b.tokens[1].created_at = 201;
        assert_eq!(b.out_of_bounds_tokens(), vec![Address::repeat_byte(2)]);
        assert!(matches!(b.validate(), Err(SnapshotError::InvalidConfig(_))));
    }

    #[test]
    fn test_inverted_timeframe_rejected() {
        let mut b = batch();
        b.timeframe = Timeframe::new(300, 200);
        assert!(b.validate().is_err());
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let mut b = batch();
        b.tokens[1].address = b.tokens[0].address;
        assert!(b.validate().is_err());
    }

    #[test]
    fn test_bad_weight_rejected() {
        let mut b = batch();
        b.tokens[0].weight = "12,5".into();
        assert!(matches!(b.validate(), Err(SnapshotError::InvalidDecimal { .. })));
    }

    #[test]
    fn test_decimal_amount_from_toml() {
        #[derive(Deserialize)]
        struct Row {
            a: DecimalAmount,
            b: DecimalAmount,
        }
        let row: Row = toml::from_str("a = \"1.28e9\"\nb = 12500\n").unwrap();
        assert_eq!(row.a.as_str(), "1.28e9");
        assert_eq!(row.b.as_str(), "12500");

        #[derive(Debug, Deserialize)]
        struct Bad {
            #[allow(dead_code)]
            a: DecimalAmount,
        }
        let err = toml::from_str::<Bad>("a = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("not accepted"));
    }
}
