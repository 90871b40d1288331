//! Integer-only conversion between human prices and token base units.
//!
//! No `f64` arithmetic touches an amount: `"$2.50"` is split on the decimal
//! point and scaled digit-wise into `2_500_000` base units (6 decimals).

use crate::error::X402Error;

/// Parse a human-readable price (`"2.5"`, `"$0.001"`, `"3"`) into base units.
///
/// Zeros past `decimals` fractional places are accepted; any other digit there
/// is rejected rather than rounded away. Negative values, empty input and
/// anything that is not `[$]digits[.digits]` are rejected too.
pub fn parse_price(price: &str, decimals: u32) -> Result<u64, X402Error> {
    let trimmed = price.trim();
    let cleaned = trimmed.strip_prefix('$').unwrap_or(trimmed);

    if cleaned.is_empty() || cleaned == "." {
        return Err(X402Error::InvalidPrice(format!(
            "'{price}': no numeric content"
        )));
    }
    if !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(X402Error::InvalidPrice(format!(
            "'{price}': expected a non-negative decimal amount"
        )));
    }

    let (integer_part, fractional_part) = cleaned.split_once('.').unwrap_or((cleaned, ""));
    if fractional_part.contains('.') {
        return Err(X402Error::InvalidPrice(format!(
            "'{price}': more than one decimal point"
        )));
    }

    let multiplier = 10u64.pow(decimals);
    let integer: u64 = if integer_part.is_empty() {
        0
    } else {
        integer_part
            .parse()
            .map_err(|e| X402Error::InvalidPrice(format!("'{price}': integer part: {e}")))?
    };

    let decimals = decimals as usize;
    let (frac_digits, excess) = fractional_part.split_at(fractional_part.len().min(decimals));
    if excess.bytes().any(|b| b != b'0') {
        return Err(X402Error::InvalidPrice(format!(
            "'{price}': more than {decimals} decimal places"
        )));
    }
    let fractional: u64 = if frac_digits.is_empty() {
        0
    } else {
        let raw: u64 = frac_digits
            .parse()
            .map_err(|e| X402Error::InvalidPrice(format!("'{price}': fractional part: {e}")))?;
        raw * 10u64.pow((decimals - frac_digits.len()) as u32)
    };

    integer
        .checked_mul(multiplier)
        .and_then(|units| units.checked_add(fractional))
        .ok_or_else(|| X402Error::InvalidPrice(format!("'{price}': overflow")))
}

/// Render base units as a decimal string with trailing zeros trimmed.
/// e.g. `2_500_000` with 6 decimals -> `"2.5"`, `3_000_000` -> `"3"`.
pub fn format_amount(units: u64, decimals: u32) -> String {
    let multiplier = 10u64.pow(decimals);
    let whole = units / multiplier;
    let fraction = units % multiplier;
    if fraction == 0 {
        return whole.to_string();
    }
    let raw = format!("{whole}.{fraction:0width$}", width = decimals as usize);
    raw.trim_end_matches('0').to_string()
}
