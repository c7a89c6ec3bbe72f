//! The decision handed back to the request handler.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of a rate limit check or status read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the submission must be rejected
    pub limited: bool,
    /// Submissions left in the current window
    pub remaining: u32,
    /// When the oldest counted submission leaves the window (epoch ms)
    pub reset_time: u64,
}

impl RateLimitResult {
    /// Time left until `reset_time`, measured from `now_millis`.
    pub fn retry_after(&self, now_millis: u64) -> Duration {
        Duration::from_millis(self.reset_time.saturating_sub(now_millis))
    }

    /// Whole minutes until `reset_time`, rounded up and never below one.
    ///
    /// Suitable for a "try again in N minutes" message.
    pub fn minutes_until_reset(&self, now_millis: u64) -> u64 {
        let millis = self.reset_time.saturating_sub(now_millis);
        millis.div_ceil(60_000).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_camel_case() {
        let result = RateLimitResult {
            limited: true,
            remaining: 0,
            reset_time: 1_700_000_000_000,
        };

        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(
            json,
            r#"{"limited":true,"remaining":0,"resetTime":1700000000000}"#
        );
    }

    #[test]
    fn test_minutes_until_reset_rounds_up() {
        let result = RateLimitResult {
            limited: true,
            remaining: 0,
            reset_time: 10 * 60_000 + 1,
        };

        assert_eq!(result.minutes_until_reset(0), 11);
        assert_eq!(result.minutes_until_reset(10 * 60_000), 1);
        assert_eq!(result.minutes_until_reset(u64::MAX), 1);
    }

    #[test]
    fn test_retry_after() {
        let result = RateLimitResult {
            limited: true,
            remaining: 0,
            reset_time: 5_000,
        };

        assert_eq!(result.retry_after(2_000), Duration::from_secs(3));
        assert_eq!(result.retry_after(9_000), Duration::ZERO);
    }
}
