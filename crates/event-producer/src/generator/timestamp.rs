//! 时间戳缓存
//!
//! 每个刷新间隔最多读取并格式化一次墙钟，结果固定滞后于墙钟一个 skew。

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use loadgen_shared::events::format_timestamp;

#[derive(Debug)]
struct Cached {
    refreshed_at: Instant,
    value: DateTime<Utc>,
    formatted: String,
}

/// 带滞后的时间戳缓存
///
/// 返回值在多次调用之间单调不减：即使墙钟被向后调整，也继续沿用上一个值。
#[derive(Debug)]
pub struct TimestampCache {
    refresh: Duration,
    skew: chrono::Duration,
    cached: Option<Cached>,
}

impl TimestampCache {
    pub fn new(refresh: Duration, skew: Duration) -> Self {
        Self {
            refresh,
            skew: chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::zero()),
            cached: None,
        }
    }

    /// 以当前时钟读取
    pub fn get(&mut self) -> String {
        self.get_at(Instant::now(), Utc::now())
    }

    /// 以给定的单调时钟与墙钟读取
    ///
    /// 距上次刷新超过刷新间隔时重新计算 `wall - skew`，否则复用缓存值。
    pub fn get_at(&mut self, now: Instant, wall: DateTime<Utc>) -> String {
        if let Some(cached) = &self.cached
            && now.saturating_duration_since(cached.refreshed_at) <= self.refresh
        {
            return cached.formatted.clone();
        }

        let candidate = wall - self.skew;
        let value = match &self.cached {
            Some(prev) if prev.value > candidate => prev.value,
            _ => candidate,
        };
        let formatted = format_timestamp(value);

        self.cached = Some(Cached {
            refreshed_at: now,
            value,
            formatted: formatted.clone(),
        });
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn wall(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, secs).unwrap()
    }

    fn cache() -> TimestampCache {
        TimestampCache::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    #[test]
    fn test_applies_skew() {
        let mut cache = cache();
        let ts = cache.get_at(Instant::now(), wall(40));
        assert_eq!(ts, "2024-05-01T12:00:10.000000+00:00");
    }

    #[test]
    fn test_reuses_value_within_interval() {
        let mut cache = cache();
        let start = Instant::now();

        let first = cache.get_at(start, wall(40));
        let second = cache.get_at(start + Duration::from_millis(900), wall(41));

        assert_eq!(first, second);
    }

    #[test]
    fn test_refreshes_after_interval() {
        let mut cache = cache();
        let start = Instant::now();

        let first = cache.get_at(start, wall(40));
        let later = cache.get_at(start + Duration::from_millis(1_100), wall(41));

        assert_eq!(later, "2024-05-01T12:00:11.000000+00:00");
        assert!(later > first);
    }

    #[test]
    fn test_never_goes_backwards_when_wall_clock_steps_back() {
        let mut cache = cache();
        let start = Instant::now();

        let first = cache.get_at(start, wall(50));
        let after_step = cache.get_at(start + Duration::from_secs(2), wall(45));

        assert_eq!(first, after_step);
    }
}
