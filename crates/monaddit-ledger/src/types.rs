//! Identifiers, amounts and time units shared by every ledger component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{DECIMALS, ONE_MDT};
use crate::error::{LedgerError, Result};

/// Token amount in base units (10^-18 MDT)
pub type Amount = u128;

/// Seconds on the ledger clock
pub type Timestamp = i64;

/// Bond identifier, assigned sequentially from 1
pub type BondId = u64;

/// Challenge identifier, assigned sequentially from 1
pub type ChallengeId = u64;

/// Account address: `0x` followed by 20 hex-encoded bytes, stored lowercase
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalize a hex address
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let invalid = || LedgerError::InvalidAddress(raw.to_string());

        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(invalid)?;
        let bytes = hex::decode(digits).map_err(|_| invalid())?;
        if bytes.len() != 20 {
            return Err(invalid());
        }

        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    /// Build an address from raw bytes
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content identifier issued by the content store
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ContentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a decimal MDT string ("10", "0.1", ".5") into base units
pub fn parse_mdt(raw: &str) -> Result<Amount> {
    let text = raw.trim();
    let invalid = || LedgerError::InvalidAmount(format!("'{}' is not a valid MDT amount", raw));

    let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac.len() > DECIMALS as usize {
        return Err(LedgerError::InvalidAmount(format!(
            "'{}' has more than {} decimal places",
            raw, DECIMALS
        )));
    }

    let whole_units: u128 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
    let frac_units: u128 = if frac.is_empty() {
        0
    } else {
        let scale = 10u128.pow(DECIMALS as u32 - frac.len() as u32);
        frac.parse::<u128>().map_err(|_| invalid())? * scale
    };

    whole_units
        .checked_mul(ONE_MDT)
        .and_then(|units| units.checked_add(frac_units))
        .ok_or_else(invalid)
}

/// Render base units as a decimal MDT string without trailing zeros
pub fn format_mdt(amount: Amount) -> String {
    let whole = amount / ONE_MDT;
    let frac = amount % ONE_MDT;
    if frac == 0 {
        return whole.to_string();
    }

    let digits = format!("{:0width$}", frac, width = DECIMALS as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// `a * b / d` with a 256-bit intermediate, floored.
///
/// Callers guarantee `d > 0` and a quotient that fits in 128 bits.
pub(crate) fn mul_div(a: u128, b: u128, d: u128) -> u128 {
    assert!(d > 0, "mul_div by zero");
    if let Some(product) = a.checked_mul(b) {
        return product / d;
    }

    let (hi, lo) = widening_mul(a, b);
    let mut quotient: u128 = 0;
    let mut rem: u128 = 0;
    for i in (0..256).rev() {
        let bit = if i >= 128 { (hi >> (i - 128)) & 1 } else { (lo >> i) & 1 };
        let carry = rem >> 127;
        rem = (rem << 1) | bit;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            if i < 128 {
                quotient |= 1 << i;
            }
        }
    }
    quotient
}

fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a_hi, a_lo) = (a >> 64, a & MASK);
    let (b_hi, b_lo) = (b >> 64, b & MASK);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = (ll >> 64) + (lh & MASK) + (hl & MASK);
    let lo = (ll & MASK) | (mid << 64);
    let hi = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (hi, lo)
}

/// Serde helper: amounts as decimal strings of base units.
///
/// Numbers are accepted on input for small values.
pub mod amount_serde {
    use super::Amount;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.trim().parse::<Amount>().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(n as Amount),
        }
    }
}

/// Serde helper for optional base-unit amounts
pub mod option_amount_serde {
    use super::Amount;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Amount>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(amount) => serializer.serialize_str(&amount.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Amount>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::amount_serde")] Amount);

        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(amount)| amount))
    }
}

/// Serde helper for signed base-unit deltas (token transfers)
pub mod delta_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.trim().parse::<i128>().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(n as i128),
        }
    }
}

/// Serde helper: amounts as human-readable MDT strings ("0.1"), used in config files
pub mod mdt_serde {
    use super::{format_mdt, parse_mdt, Amount};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Whole(u64),
        Fractional(f64),
    }

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_mdt(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text,
            Raw::Whole(n) => n.to_string(),
            Raw::Fractional(f) => f.to_string(),
        };
        parse_mdt(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalized() {
        let addr = Address::parse("0xABCDEF0123456789abcdef0123456789ABCDEF01").unwrap();
        assert_eq!(addr.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!(Address::parse("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn test_address_json() {
        let addr = Address::from_bytes([7u8; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr));
        assert!(serde_json::from_str::<Address>("\"0x12\"").is_err());
    }

    #[test]
    fn test_parse_mdt() {
        assert_eq!(parse_mdt("10").unwrap(), 10 * ONE_MDT);
        assert_eq!(parse_mdt("0.1").unwrap(), ONE_MDT / 10);
        assert_eq!(parse_mdt(".2").unwrap(), ONE_MDT / 5);
        assert_eq!(parse_mdt("1.000000000000000001").unwrap(), ONE_MDT + 1);
        assert!(parse_mdt("").is_err());
        assert!(parse_mdt("1.0000000000000000001").is_err());
        assert!(parse_mdt("-1").is_err());
        assert!(parse_mdt("1e3").is_err());
    }

    #[test]
    fn test_format_mdt() {
        assert_eq!(format_mdt(10 * ONE_MDT), "10");
        assert_eq!(format_mdt(ONE_MDT / 10), "0.1");
        assert_eq!(format_mdt(9 * ONE_MDT + ONE_MDT * 9 / 10), "9.9");
        assert_eq!(format_mdt(1), "0.000000000000000001");
    }

    #[test]
    fn test_mul_div_small() {
        assert_eq!(mul_div(1000, 3, 4), 750);
        assert_eq!(mul_div(10, 1, 3), 3);
    }

    #[test]
    fn test_mul_div_wide() {
        // 1000 MDT pool * 10^6 MDT stake overflows u128 before the division.
        let pool = 1_000 * ONE_MDT;
        let stake = 1_000_000 * ONE_MDT;
        let total = 4_000_000 * ONE_MDT;
        assert!(pool.checked_mul(stake).is_none());
        assert_eq!(mul_div(pool, stake, total), 250 * ONE_MDT);
        assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX), u128::MAX);
    }

    #[test]
    fn test_amount_serde() {
        #[derive(Serialize, Deserialize)]
        struct Body {
            #[serde(with = "amount_serde")]
            amount: Amount,
        }

        let json = serde_json::to_string(&Body { amount: ONE_MDT }).unwrap();
        assert_eq!(json, r#"{"amount":"1000000000000000000"}"#);
        let from_number: Body = serde_json::from_str(r#"{"amount":42}"#).unwrap();
        assert_eq!(from_number.amount, 42);
    }
}
