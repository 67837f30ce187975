use crate::utils::error::{LoadTestError, Result};
use std::time::Duration;

/// 解析 `100ms`、`30s`、`1m30s`、`1.5s` 這類時間字串
pub fn parse_duration(s: &str) -> Result<Duration> {
    let input = s.trim();
    if input.is_empty() {
        return Err(invalid(s, "duration cannot be empty"));
    }

    let mut total_nanos = 0u64;
    let mut rest = input;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| invalid(s, "missing unit (use ms, s, m or h)"))?;
        if number_len == 0 {
            return Err(invalid(s, "expected a number before the unit"));
        }

        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid(s, "invalid numeric value"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(invalid(s, &format!("unknown unit '{}'", unit))),
        };
        rest = &rest[unit_len..];

        let nanos = (value * nanos_per_unit).round();
        // u64::MAX 轉成 f64 會進位，用 >= 排除
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Err(invalid(s, "duration is too large"));
        }
        total_nanos = total_nanos
            .checked_add(nanos as u64)
            .ok_or_else(|| invalid(s, "duration is too large"))?;
    }

    Ok(Duration::from_nanos(total_nanos))
}

pub fn parse_optional_duration(value: Option<&str>, default: Duration) -> Result<Duration> {
    match value {
        Some(v) => parse_duration(v),
        None => Ok(default),
    }
}

fn invalid(value: &str, reason: &str) -> LoadTestError {
    LoadTestError::InvalidDurationError {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(" 0.1s ").unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("1..5s").is_err());
    }

    #[test]
    fn test_parse_rejects_overflow() {
        let err = parse_duration("99999999999h99999999999h").unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!(parse_duration("5000000h5000000h").is_err());
        assert!(parse_duration("1e400s").is_err());
        assert_eq!(parse_duration("5000000h").unwrap(), Duration::from_secs(5_000_000 * 3600));
    }
}
