//! Fixed-window request throttling.
//!
//! Keyed by a caller-supplied composite key (an IP, or domain plus
//! identity). A key's window resets lazily on the first touch after it
//! expires; there is no background sweep. State is a single in-process
//! DashMap, which is a known limitation at multi-instance scale, not a
//! defect at single-instance scale.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{ErrorCode, ServiceError};
use crate::utils::Clock;

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit: limit.max(1),
            window: Duration::seconds(window_seconds.max(1) as i64),
            windows: DashMap::new(),
            clock,
        }
    }

    /// Count one request against `key`; rejects once the key exceeded the
    /// limit inside the current window.
    pub fn check(&self, key: &str) -> Result<(), ServiceError> {
        let now = self.clock.now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window {
                started_at: now,
                count: 0,
            });

        if now - entry.started_at >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            return Err(ServiceError::RateLimited(
                ErrorCode::RateLimitExceeded,
                format!("rate limit of {} per window exceeded", self.limit),
            ));
        }
        entry.count += 1;
        Ok(())
    }
}

/// Key for per-tenant, per-identity limits.
pub fn composite_key(domain: &str, identity: &str) -> String {
    format!("{domain}|{identity}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{ManualClock, SystemClock};
    use chrono::TimeZone;

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn limit_plus_one_is_rejected_inside_the_window() {
        let limiter = FixedWindowLimiter::new(3, 60, manual_clock());

        assert!(limiter.check("1.2.3.4").is_ok());
        assert!(limiter.check("1.2.3.4").is_ok());
        assert!(limiter.check("1.2.3.4").is_ok());
        let err = limiter.check("1.2.3.4").unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited(..)));
    }

    #[test]
    fn window_resets_lazily_at_the_boundary() {
        let clock = manual_clock();
        let limiter = FixedWindowLimiter::new(2, 60, clock.clone());

        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_err());

        // Just before the boundary: still rejected.
        clock.advance(Duration::seconds(59));
        assert!(limiter.check("k").is_err());

        // Just past it: the window resets on first touch.
        clock.advance(Duration::seconds(1));
        assert!(limiter.check("k").is_ok());
    }

    #[test]
    fn keys_are_isolated() {
        let limiter = FixedWindowLimiter::new(1, 60, manual_clock());

        assert!(limiter.check("1.2.3.4").is_ok());
        assert!(limiter.check("1.2.3.4").is_err());
        assert!(limiter.check("5.6.7.8").is_ok());
        assert!(limiter
            .check(&composite_key("tenant.example", "a@example.com"))
            .is_ok());
    }

    #[test]
    fn composite_keys_do_not_collide_across_tenants() {
        let limiter = FixedWindowLimiter::new(1, 60, Arc::new(SystemClock));
        let a = composite_key("a.example", "user@example.com");
        let b = composite_key("b.example", "user@example.com");

        assert!(limiter.check(&a).is_ok());
        assert!(limiter.check(&b).is_ok());
        assert!(limiter.check(&a).is_err());
    }
}
