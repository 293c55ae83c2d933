//! PDV fixed-point scale.
//!
//! Every ledger amount is stored as an integer number of micro-PDV (uPDV).
//! These constants are the only place the scale is defined; storage views,
//! handlers and query results all go through them.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::IndexerError;

/// uPDV per 1 PDV.
pub const PDV_DENOMINATOR: i64 = 1_000_000;

/// Number of decimal places representable at [`PDV_DENOMINATOR`].
const PDV_DECIMALS: usize = 6;

/// uPDV credited to the post owner per unit of like weight.
pub const UPDV_PER_LIKE: i64 = 1;

/// Balance every account starts with, in uPDV.
pub const INITIAL_BALANCE: i64 = PDV_DENOMINATOR;

/// Calendar date of the ledger's zero time. Entries stamped with it are initial
/// balance injections.
pub fn sentinel_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// The ledger's zero time (`0001-01-01T00:00:00Z`).
pub fn sentinel_time() -> DateTime<Utc> {
    sentinel_date()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

/// Returns `true` if `date` is the initial-balance sentinel.
pub fn is_sentinel(date: NaiveDate) -> bool {
    date == sentinel_date()
}

/// Convert uPDV to PDV for presentation.
pub fn denominate(updv: i64) -> f64 {
    updv as f64 / PDV_DENOMINATOR as f64
}

/// Parse a decimal PDV amount (e.g. `"0.000100"`, `"-1.5"`) into uPDV.
///
/// Digits beyond the sixth decimal place are truncated toward zero.
pub fn parse_pdv(s: &str) -> Result<i64, IndexerError> {
    let invalid = || IndexerError::Validation(format!("invalid PDV amount '{s}'"));

    let trimmed = s.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| invalid())?
    };

    let mut frac = frac_part.chars().take(PDV_DECIMALS).collect::<String>();
    while frac.len() < PDV_DECIMALS {
        frac.push('0');
    }
    let frac: i64 = frac.parse().map_err(|_| invalid())?;

    let value = whole
        .checked_mul(PDV_DENOMINATOR)
        .and_then(|v| v.checked_add(frac))
        .ok_or_else(invalid)?;

    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_truncates_to_micro_units() {
        assert_eq!(parse_pdv("0.0001").unwrap(), 100);
        assert_eq!(parse_pdv("0.00001").unwrap(), 10);
        assert_eq!(parse_pdv("1").unwrap(), PDV_DENOMINATOR);
        assert_eq!(parse_pdv("2.5").unwrap(), 2_500_000);
        assert_eq!(parse_pdv("0.000000999999999999").unwrap(), 0);
        assert_eq!(parse_pdv("-0.25").unwrap(), -250_000);
        assert_eq!(parse_pdv(".5").unwrap(), 500_000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_pdv("").is_err());
        assert!(parse_pdv("abc").is_err());
        assert!(parse_pdv("1.2.3").is_err());
        assert!(parse_pdv("1e6").is_err());
    }

    #[test]
    fn sentinel_is_year_one() {
        assert_eq!(sentinel_date().to_string(), "0001-01-01");
        assert!(is_sentinel(sentinel_time().date_naive()));
        assert_eq!(denominate(INITIAL_BALANCE), 1.0);
    }
}
