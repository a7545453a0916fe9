use std::fmt;

use thiserror::Error;

/// Errors produced while reading a decimal amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("unexpected character '{0}' in amount")]
    InvalidCharacter(char),
    #[error("amount has more than {scale} decimal places")]
    TooManyDecimals { scale: u8 },
    #[error("amount is malformed")]
    Malformed,
    #[error("amount does not fit in 128 bits")]
    Overflow,
}

/// Largest scale whose divisor (`10^scale`) fits in 128 bits.
pub const MAX_SCALE: u8 = 38;

/// Fixed-point amount stored as an unsigned integer count of minor units.
///
/// The scale (number of decimal places) belongs to the currency, not to the
/// amount, so it is passed in when parsing and formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_minor(value: u128) -> Self {
        Amount(value)
    }

    pub fn minor(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parse a plain decimal string (`"12"`, `"12.5"`, `"0.01"`) into minor
    /// units of a currency with `scale` decimal places.
    ///
    /// No sign, exponent or grouping characters are accepted and the value
    /// never goes through a binary float.
    pub fn parse(text: &str, scale: u8) -> Result<Self, AmountError> {
        if text.is_empty() {
            return Err(AmountError::Empty);
        }

        let (whole, frac) = match text.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (text, ""),
        };

        if whole.is_empty() || (text.contains('.') && frac.is_empty()) {
            return Err(AmountError::Malformed);
        }
        if let Some(c) = whole.chars().chain(frac.chars()).find(|c| !c.is_ascii_digit()) {
            return Err(AmountError::InvalidCharacter(c));
        }
        if frac.len() > scale as usize {
            return Err(AmountError::TooManyDecimals { scale });
        }

        let mut minor: u128 = 0;
        for digit in whole.bytes().chain(frac.bytes()) {
            minor = minor
                .checked_mul(10)
                .and_then(|v| v.checked_add(u128::from(digit - b'0')))
                .ok_or(AmountError::Overflow)?;
        }
        // pad missing fractional digits
        for _ in frac.len()..scale as usize {
            minor = minor.checked_mul(10).ok_or(AmountError::Overflow)?;
        }

        Ok(Amount(minor))
    }

    /// Render with exactly `scale` decimal places.
    pub fn display(self, scale: u8) -> ScaledAmount {
        ScaledAmount {
            minor: self.0,
            scale,
            negative: false,
        }
    }

    /// Render as a negative quantity, used for debit-heavy balances.
    pub fn display_negative(self, scale: u8) -> ScaledAmount {
        ScaledAmount {
            minor: self.0,
            scale,
            negative: self.0 != 0,
        }
    }
}

/// Display adapter returned by [`Amount::display`].
#[derive(Debug, Clone, Copy)]
pub struct ScaledAmount {
    minor: u128,
    scale: u8,
    negative: bool,
}

impl fmt::Display for ScaledAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.negative { "-" } else { "" };
        if self.scale == 0 {
            return write!(f, "{sign}{}", self.minor);
        }
        let divisor = 10u128.pow(u32::from(self.scale));
        let whole = self.minor / divisor;
        let frac = self.minor % divisor;
        let width = self.scale as usize;
        write!(f, "{sign}{whole}.{frac:0width$}")
    }
}
