//! Kubernetes quantity arithmetic
//!
//! Quantities are parsed into integer milli-units so sums and ratios stay
//! exact on large values. Fractional milli-units round up, matching how the
//! API server canonicalizes quantities.

use thiserror::Error;

/// A quantity string that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quantity '{input}': {message}")]
pub struct QuantityError {
    /// The rejected input
    pub input: String,
    /// What is wrong with it
    pub message: String,
}

impl QuantityError {
    fn new(input: &str, message: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            message: message.into(),
        }
    }
}

const BINARY_SUFFIXES: &[(&str, u32)] = &[
    ("Ki", 10),
    ("Mi", 20),
    ("Gi", 30),
    ("Ti", 40),
    ("Pi", 50),
    ("Ei", 60),
];

const DECIMAL_SUFFIXES: &[(&str, i32)] = &[
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("", 0),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Largest exponent accepted in scientific notation
const MAX_EXPONENT: i32 = 24;

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

/// Parse a quantity such as `250m`, `2`, `1.5`, `512Mi`, `1e3` into milli-units.
///
/// Negative quantities are rejected; capacity and usage are never negative.
pub fn parse_milli(input: &str) -> Result<i64, QuantityError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(QuantityError::new(input, "empty"));
    }

    let s = s.strip_prefix('+').unwrap_or(s);
    if s.starts_with('-') {
        return Err(QuantityError::new(input, "negative"));
    }

    let number_end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(number_end);

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(QuantityError::new(input, "missing number"));
    }
    if frac_part.contains('.') {
        return Err(QuantityError::new(input, "more than one decimal point"));
    }

    let digits = format!("{}{}", int_part, frac_part);
    let mantissa: i128 = digits
        .parse()
        .map_err(|_| QuantityError::new(input, "number too large"))?;
    let scale = frac_part.len() as i32;

    // value = mantissa * 10^-scale * multiplier; milli = value * 1000
    let (mut numerator, mut decimal_exp) = (mantissa, 3 - scale);

    if let Some((_, shift)) = BINARY_SUFFIXES.iter().find(|(name, _)| *name == suffix) {
        numerator = numerator
            .checked_mul(1i128 << shift)
            .ok_or_else(|| QuantityError::new(input, "overflow"))?;
    } else if let Some((_, exp)) = DECIMAL_SUFFIXES.iter().find(|(name, _)| *name == suffix) {
        decimal_exp += exp;
    } else if let Some(exp) = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))
        .and_then(|e| e.parse::<i32>().ok())
    {
        if exp.abs() > MAX_EXPONENT {
            return Err(QuantityError::new(input, "exponent out of range"));
        }
        decimal_exp += exp;
    } else {
        return Err(QuantityError::new(input, format!("unknown suffix '{}'", suffix)));
    }

    let milli = if decimal_exp >= 0 {
        pow10(decimal_exp as u32)
            .and_then(|p| numerator.checked_mul(p))
            .ok_or_else(|| QuantityError::new(input, "overflow"))?
    } else {
        match pow10(decimal_exp.unsigned_abs()) {
            Some(divisor) => numerator / divisor + i128::from(numerator % divisor != 0),
            None => i128::from(numerator > 0),
        }
    };

    i64::try_from(milli).map_err(|_| QuantityError::new(input, "overflow"))
}

/// Format milli-units as a decimal quantity (`250m`, `4`)
pub fn format_decimal(milli: i64) -> String {
    if milli % 1000 == 0 {
        format!("{}", milli / 1000)
    } else {
        format!("{}m", milli)
    }
}

/// Format milli-units using the largest exact binary suffix (`512Mi`, `1Gi`)
pub fn format_binary(milli: i64) -> String {
    if milli % 1000 != 0 {
        return format!("{}m", milli);
    }
    let units = milli / 1000;
    if units == 0 {
        return "0".to_string();
    }
    BINARY_SUFFIXES
        .iter()
        .rev()
        .find(|(_, shift)| units % (1i64 << shift) == 0)
        .map(|(name, shift)| format!("{}{}", units >> shift, name))
        .unwrap_or_else(|| units.to_string())
}
