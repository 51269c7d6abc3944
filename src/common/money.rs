use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

use super::error::AppError;

/// Balances are stored as decimal(19,2).
pub const AMOUNT_SCALE: u32 = 2;

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    CNY,
    USD,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Currency::CNY => "CNY",
            Currency::USD => "USD",
        };
        write!(f, "{}", code)
    }
}

impl FromStr for Currency {
    type Err = CurrencyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CNY" => Ok(Currency::CNY),
            "USD" => Ok(Currency::USD),
            _ => Err(CurrencyParseError),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CurrencyParseError;

impl fmt::Display for CurrencyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid currency")
    }
}

impl Error for CurrencyParseError {}

/// Checks a money-moving amount: strictly positive and representable at
/// scale 2 without rounding. Returns the amount rescaled to exactly 2 places.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!(
            "amount must be greater than 0, got {}",
            amount
        )));
    }
    let normalized = amount.normalize();
    if normalized.scale() > AMOUNT_SCALE {
        return Err(AppError::InvalidAmount(format!(
            "amount {} has more than {} decimal places",
            amount, AMOUNT_SCALE
        )));
    }
    let mut scaled = normalized;
    scaled.rescale(AMOUNT_SCALE);
    Ok(scaled)
}
