//!
//! Cooldown hint extraction from backend error bodies.
//!
//! Rate-limit responses carry `google.rpc` detail objects. The reset instant is
//! taken from, in order:
//! 1. `ErrorInfo.metadata.quotaResetTimeStamp` (RFC 3339)
//! 2. `ErrorInfo.metadata.quotaResetDelay` (duration such as `13h19m1.2s`)
//! 3. `RetryInfo.retryDelay` (duration such as `12.5s`)
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/* --- constants ------------------------------------------------------------------------------- */

const ERROR_INFO_TYPE: &str = "type.googleapis.com/google.rpc.ErrorInfo";
const RETRY_INFO_TYPE: &str = "type.googleapis.com/google.rpc.RetryInfo";

static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)(h|ms|m|s|us|µs|ns)").expect("static duration pattern")
});

/* --- start of code -------------------------------------------------------------------------- */

///
/// Extract the instant a rate-limited credential becomes usable again.
///
/// # Arguments
///  * `body` - raw backend error body
///  * `now` - reference instant for relative delays
///
/// # Returns
///  * `Some(instant)` when the body carries a usable hint, `None` otherwise
pub fn parse_cooldown(body: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value: Value = serde_json::from_str(body).ok()?;
    let details = value.get("error")?.get("details")?.as_array()?;

    let detail_of = |type_url: &str| {
        details.iter().find(|d| d.get("@type").and_then(Value::as_str) == Some(type_url))
    };

    if let Some(metadata) = detail_of(ERROR_INFO_TYPE).and_then(|d| d.get("metadata")) {
        if let Some(ts) = metadata.get("quotaResetTimeStamp").and_then(Value::as_str) {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(ts) {
                return Some(parsed.to_utc());
            }
            tracing::debug!("Unparseable quotaResetTimeStamp: {}", ts);
        }
        if let Some(delay) =
            metadata.get("quotaResetDelay").and_then(Value::as_str).and_then(parse_duration)
        {
            return Some(now + delay);
        }
    }

    detail_of(RETRY_INFO_TYPE)
        .and_then(|d| d.get("retryDelay"))
        .and_then(Value::as_str)
        .and_then(parse_duration)
        .map(|delay| now + delay)
}

/// Parse a duration string in the `1h2m3.5s` / `250ms` family
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let mut total_nanos: f64 = 0.0;
    let mut consumed = 0;
    for caps in DURATION_PART.captures_iter(text) {
        let whole = caps.get(0)?;
        if whole.start() != consumed {
            return None;
        }
        consumed = whole.end();

        let amount: f64 = caps[1].parse().ok()?;
        let unit_nanos = match &caps[2] {
            "h" => 3_600e9,
            "m" => 60e9,
            "s" => 1e9,
            "ms" => 1e6,
            "us" | "µs" => 1e3,
            _ => 1.0,
        };
        total_nanos += amount * unit_nanos;
    }

    if consumed != text.len() {
        return None;
    }
    Some(Duration::nanoseconds(total_nanos.round() as i64))
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-11-30T01:00:00Z").unwrap().to_utc()
    }

    #[test]
    fn test_quota_reset_timestamp_wins() {
        let body = r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","details":[
            {"@type":"type.googleapis.com/google.rpc.ErrorInfo","reason":"QUOTA_EXHAUSTED",
             "metadata":{"quotaResetTimeStamp":"2025-11-30T14:57:24Z","quotaResetDelay":"1s"}},
            {"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"5s"}]}}"#;

        let expected = DateTime::parse_from_rfc3339("2025-11-30T14:57:24Z").unwrap().to_utc();
        assert_eq!(parse_cooldown(body, now()), Some(expected));
    }

    #[test]
    fn test_quota_reset_delay_relative_to_now() {
        let body = r#"{"error":{"details":[{"@type":"type.googleapis.com/google.rpc.ErrorInfo",
            "metadata":{"quotaResetDelay":"1h30m"}}]}}"#;
        assert_eq!(parse_cooldown(body, now()), Some(now() + Duration::minutes(90)));
    }

    #[test]
    fn test_retry_info_fallback() {
        let body = r#"{"error":{"details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo",
            "retryDelay":"12.5s"}]}}"#;
        assert_eq!(parse_cooldown(body, now()), Some(now() + Duration::milliseconds(12_500)));
    }

    #[test]
    fn test_no_hint() {
        assert_eq!(parse_cooldown("not json", now()), None);
        assert_eq!(parse_cooldown(r#"{"error":{"code":429}}"#, now()), None);
        assert_eq!(parse_cooldown(r#"{"error":{"details":[]}}"#, now()), None);
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("250ms"), Some(Duration::milliseconds(250)));
        assert_eq!(parse_duration("2m3s"), Some(Duration::seconds(123)));
        assert_eq!(parse_duration("13h19m1.5s"), Some(Duration::milliseconds(47_941_500)));
        assert_eq!(parse_duration("3 seconds"), None);
        assert_eq!(parse_duration(""), None);
    }
}
