//! CPU quantity parsing
//!
//! Accepts the Kubernetes quantity forms used for CPU (`0.1`, `250m`, `2`,
//! `1k`, `1Ki`, `1e3`) and normalizes them to the canonical form the API
//! server returns, so a desired request compares equal to the live one.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::fmt;
use std::str::FromStr;

/// A CPU amount in millicores
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CpuQuantity {
    millis: u64,
}

impl CpuQuantity {
    pub fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn to_quantity(self) -> Quantity {
        Quantity(self.to_string())
    }
}

impl fmt::Display for CpuQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 == 0 {
            write!(f, "{}", self.millis / 1000)
        } else {
            write!(f, "{}m", self.millis)
        }
    }
}

impl FromStr for CpuQuantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::QuantityParse("empty quantity string".into()));
        }

        let num_end = s
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        let (num_str, suffix) = s.split_at(num_end);

        let (mut mantissa, mut scale) = parse_decimal(num_str)
            .ok_or_else(|| Error::QuantityParse(format!("invalid number: {}", s)))?;

        // Multiplier in millicores for each suffix
        let multiplier: u128 = match suffix {
            "m" => 1,
            "" => 1_000,
            "k" => 1_000_000,
            "M" => 1_000_000_000,
            "G" => 1_000_000_000_000,
            "T" => 1_000_000_000_000_000,
            "P" => 1_000_000_000_000_000_000,
            "E" => 1_000_000_000_000_000_000_000,
            "Ki" => 1_000 << 10,
            "Mi" => 1_000 << 20,
            "Gi" => 1_000 << 30,
            "Ti" => 1_000 << 40,
            "Pi" => 1_000 << 50,
            "Ei" => 1_000 << 60,
            exp if exp.starts_with(['e', 'E']) => {
                let exponent: i32 = exp[1..]
                    .parse()
                    .map_err(|_| Error::QuantityParse(format!("invalid exponent: {}", s)))?;
                if exponent >= 0 {
                    mantissa = 10u128
                        .checked_pow(exponent.unsigned_abs())
                        .and_then(|p| mantissa.checked_mul(p))
                        .ok_or_else(|| Error::QuantityParse(format!("out of range: {}", s)))?;
                } else {
                    scale += exponent.unsigned_abs();
                }
                1_000
            }
            _ => {
                return Err(Error::QuantityParse(format!("unknown suffix: {}", s)));
            }
        };

        let divisor = 10u128
            .checked_pow(scale)
            .ok_or_else(|| Error::QuantityParse(format!("too precise: {}", s)))?;
        let scaled = mantissa
            .checked_mul(multiplier)
            .ok_or_else(|| Error::QuantityParse(format!("out of range: {}", s)))?;

        // Sub-millicore fractions round up
        let millis = scaled.div_ceil(divisor);
        let millis = u64::try_from(millis)
            .map_err(|_| Error::QuantityParse(format!("out of range: {}", s)))?;
        Ok(Self { millis })
    }
}

/// Split `12.345` into (12345, 3)
fn parse_decimal(s: &str) -> Option<(u128, u32)> {
    let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{}{}", whole, fraction);
    let mantissa = digits.parse::<u128>().ok()?;
    Some((mantissa, u32::try_from(fraction.len()).ok()?))
}

/// Parse a CPU request into its canonical quantity
pub fn parse_cpu(s: &str) -> Result<Quantity> {
    Ok(s.parse::<CpuQuantity>()?.to_quantity())
}
