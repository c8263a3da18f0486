//! Compound duration parsing for `eta_max` and CLI timeout flags.
//!
//! Accepted forms: bare seconds (`"90"`), single units (`"1.5h"`,
//! `"30m"`), compounds (`"1h30m"`, `"5m30s"`), and full words
//! (`"1 hour, 30 minutes"`). Days are deliberately unsupported.

use regex::Regex;

use crate::error::ApiError;

/// Parse a duration string to whole seconds (rounded).
pub fn parse_duration(input: &str) -> Result<i64, ApiError> {
    if input.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Timeout must be a non-empty string".to_string(),
        ));
    }

    // Normalize: lowercase, strip spaces, commas, and colons.
    let cleaned: String = input
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | ',' | ':'))
        .collect();

    // Bare numbers are seconds.
    if cleaned.chars().all(|c| c.is_ascii_digit()) {
        return cleaned
            .parse::<i64>()
            .map_err(|_| ApiError::BadRequest(format!("Invalid timeout format: {}", input)));
    }

    let re = Regex::new(r"(\d+\.?\d*)([a-z]+)").expect("valid duration regex");
    let mut matched_len = 0usize;
    let mut total_seconds = 0.0f64;

    for cap in re.captures_iter(&cleaned) {
        let number: f64 = cap[1]
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Invalid number: {}", &cap[1])))?;
        let unit_secs = match &cap[2] {
            "h" | "hour" | "hours" => 3600.0,
            "m" | "min" | "minute" | "minutes" => 60.0,
            "s" | "sec" | "second" | "seconds" => 1.0,
            unit => {
                return Err(ApiError::BadRequest(format!("Invalid unit: {}", unit)));
            }
        };
        total_seconds += number * unit_secs;
        matched_len += cap[0].len();
    }

    // The whole string must be alternating number-unit pairs.
    if matched_len != cleaned.len() || matched_len == 0 {
        return Err(ApiError::BadRequest(format!(
            "Invalid timeout format: {}",
            input
        )));
    }

    Ok(total_seconds.round() as i64)
}

/// Parse an `eta_max` value at fetch time: must be strictly positive.
pub fn parse_eta_max(input: &str) -> Result<i64, ApiError> {
    let seconds = parse_duration(input)?;
    if seconds <= 0 {
        return Err(ApiError::BadRequest(format!(
            "eta_max must be positive, got {} seconds",
            seconds
        )));
    }
    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_seconds() {
        assert_eq!(parse_duration("90").unwrap(), 90);
        assert_eq!(parse_duration("0").unwrap(), 0);
    }

    #[test]
    fn single_units() {
        assert_eq!(parse_duration("60s").unwrap(), 60);
        assert_eq!(parse_duration("30m").unwrap(), 1800);
        assert_eq!(parse_duration("1.5h").unwrap(), 5400);
    }

    #[test]
    fn compound_forms() {
        assert_eq!(parse_duration("1h30m").unwrap(), 5400);
        assert_eq!(parse_duration("5m30s").unwrap(), 330);
        assert_eq!(parse_duration("1h30m15s").unwrap(), 5415);
    }

    #[test]
    fn full_word_forms() {
        assert_eq!(parse_duration("1 hour").unwrap(), 3600);
        assert_eq!(parse_duration("30 minutes").unwrap(), 1800);
        assert_eq!(parse_duration("1 hour, 30 minutes").unwrap(), 5400);
    }

    #[test]
    fn days_are_rejected() {
        assert!(parse_duration("2d").is_err());
        assert!(parse_duration("1 day").is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h30").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn eta_max_must_be_positive() {
        assert_eq!(parse_eta_max("1h").unwrap(), 3600);
        assert!(parse_eta_max("0").is_err());
        assert!(parse_eta_max("0s").is_err());
    }
}
