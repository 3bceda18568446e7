use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A monetary amount: currency symbol plus an exact decimal value.
///
/// The wire format is `"USD 12.34"`. Values round to two fractional digits
/// on serialization (midpoint rounds to even).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount {
    value: Decimal,
    symbol: String,
}

impl Amount {
    pub fn new(symbol: &str, number: &str) -> Result<Self> {
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(anyhow!("invalid currency symbol {symbol:?}"));
        }
        let value = Decimal::from_str(number).map_err(|e| anyhow!("invalid amount: {e}"))?;
        Ok(Self {
            value,
            symbol: symbol.to_uppercase(),
        })
    }

    /// Builds an amount from a whole number of cents, the unit ACH entry
    /// detail records carry.
    pub fn from_cents(symbol: &str, cents: i64) -> Self {
        Self {
            value: Decimal::new(cents, 2),
            symbol: symbol.to_uppercase(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.2}", self.symbol, self.value.round_dp(2))
    }
}

impl FromStr for Amount {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (symbol, number) = s
            .split_once(' ')
            .ok_or_else(|| anyhow!("invalid amount {s:?}"))?;
        Amount::new(symbol, number)
    }
}

impl TryFrom<String> for Amount {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Amount> for String {
    fn from(a: Amount) -> String {
        a.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let amt = Amount::new("USD", "12.00").unwrap();
        assert_eq!(amt.to_string(), "USD 12.00");

        assert!(Amount::new("", ".0").is_err());
    }

    #[test]
    fn from_str() {
        assert!("fail".parse::<Amount>().is_err());
        assert!(".0".parse::<Amount>().is_err());
        assert!("other thing".parse::<Amount>().is_err());
        assert!("USD 12.00".parse::<Amount>().is_ok());
    }

    #[test]
    fn json_round_trip() {
        let amt: Amount = serde_json::from_str(r#""USD 12.03""#).unwrap();
        assert_eq!(amt.symbol(), "USD");
        assert_eq!(serde_json::to_string(&amt).unwrap(), r#""USD 12.03""#);

        // no fractional digits in the input still renders two
        let amt = Amount::new("USD", "12").unwrap();
        assert_eq!(serde_json::to_string(&amt).unwrap(), r#""USD 12.00""#);

        // extra precision rounds away: 3/1000 -> 0.00
        let amt = Amount::new("USD", "0.003").unwrap();
        assert_eq!(serde_json::to_string(&amt).unwrap(), r#""USD 0.00""#);

        assert!(serde_json::from_str::<Amount>(r#""other thing""#).is_err());
    }

    #[test]
    fn from_cents() {
        assert_eq!(Amount::from_cents("USD", 1253).to_string(), "USD 12.53");
        assert_eq!(Amount::from_cents("USD", 7).to_string(), "USD 0.07");
    }
}
