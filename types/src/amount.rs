use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Paise per rupee.
pub const PAISE_PER_RUPEE: i64 = 100;

/// Largest rupee value accepted from the wire.
const MAX_RUPEES: f64 = 1_000_000_000_000.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is not a finite number")]
    NotFinite,
    #[error("amount is out of range")]
    OutOfRange,
    #[error("amount is not a number: {0}")]
    NotANumber(String),
}

/// A rupee amount held as integer paise.
///
/// On the wire an amount is a plain JSON number of rupees (`250` or `12.5`).
/// Numeric strings are accepted on input, since clients submit form values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_paise(paise: i64) -> Self {
        Self(paise)
    }

    pub const fn from_rupees(rupees: i64) -> Self {
        Self(rupees * PAISE_PER_RUPEE)
    }

    pub fn try_from_rupees(rupees: f64) -> Result<Self, AmountError> {
        if !rupees.is_finite() {
            return Err(AmountError::NotFinite);
        }
        if rupees.abs() > MAX_RUPEES {
            return Err(AmountError::OutOfRange);
        }
        Ok(Self((rupees * PAISE_PER_RUPEE as f64).round() as i64))
    }

    pub const fn paise(self) -> i64 {
        self.0
    }

    pub fn as_rupees(self) -> f64 {
        self.0 as f64 / PAISE_PER_RUPEE as f64
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Share of this amount in basis points, rounded down to whole paise.
    pub fn basis_points(self, bps: u32) -> Amount {
        Amount(((self.0 as i128 * bps as i128) / 10_000) as i64)
    }

    /// Sums amounts, returning `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Option<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, amount| acc.checked_add(amount))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let rupees = abs / PAISE_PER_RUPEE as u64;
        let paise = abs % PAISE_PER_RUPEE as u64;
        if paise == 0 {
            write!(f, "{sign}₹{rupees}")
        } else {
            write!(f, "{sign}₹{rupees}.{paise:02}")
        }
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 % PAISE_PER_RUPEE == 0 {
            serializer.serialize_i64(self.0 / PAISE_PER_RUPEE)
        } else {
            serializer.serialize_f64(self.as_rupees())
        }
    }
}

struct AmountVisitor;

impl de::Visitor<'_> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a rupee amount")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Amount, E> {
        value
            .checked_mul(PAISE_PER_RUPEE)
            .map(Amount)
            .ok_or_else(|| E::custom(AmountError::OutOfRange))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Amount, E> {
        i64::try_from(value)
            .ok()
            .and_then(|value| value.checked_mul(PAISE_PER_RUPEE))
            .map(Amount)
            .ok_or_else(|| E::custom(AmountError::OutOfRange))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Amount, E> {
        Amount::try_from_rupees(value).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Amount, E> {
        let trimmed = value.trim();
        let parsed: f64 = trimmed
            .parse()
            .map_err(|_| E::custom(AmountError::NotANumber(trimmed.to_string())))?;
        self.visit_f64(parsed)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}
