// src/process/period.rs

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ParseError;

/// Annual period: four-digit year, `JJ` (annual) marker, sub-period `00`.
static ANNUAL_PERIOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})JJ00$").expect("annual period pattern should parse"));

/// `"2023JJ00"` → `2023`.
///
/// Monthly (`2023MM01`), quarterly (`2023KW01`) or otherwise shaped periods
/// are rejected rather than read as a year.
pub fn year_from_period(period: &str) -> Result<i32, ParseError> {
    let bad = || ParseError::Period {
        period: period.to_string(),
    };
    let caps = ANNUAL_PERIOD.captures(period.trim()).ok_or_else(bad)?;
    caps[1].parse().map_err(|_| bad())
}
