//! 批次节流
//!
//! 以固定周期发放许可，每个许可对应一整批事件：周期 = max(下限, 批大小 / 目标速率)。
//! 第一个许可立即可用；落后的许可顺延而不是补发，避免恢复后突发。

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};

use loadgen_shared::error::{LoadgenError, Result};

/// 计算两批之间的间隔
pub fn batch_period(batch_size: usize, target_rate: f64, floor: Duration) -> Result<Duration> {
    if batch_size == 0 {
        return Err(LoadgenError::InvalidArgument {
            field: "batch_size".to_string(),
            message: "必须大于 0".to_string(),
        });
    }
    if !target_rate.is_finite() || target_rate <= 0.0 {
        return Err(LoadgenError::InvalidArgument {
            field: "target_rate".to_string(),
            message: format!("必须为正数，实际为 {target_rate}"),
        });
    }

    let period = Duration::try_from_secs_f64(batch_size as f64 / target_rate).map_err(|e| {
        LoadgenError::InvalidArgument {
            field: "target_rate".to_string(),
            message: format!("速率 {target_rate} 对应的批次间隔无法表示: {e}"),
        }
    })?;
    Ok(period.max(floor).max(Duration::from_nanos(1)))
}

/// 按批次发放许可的节流器
///
/// 计时从第一次 `acquire` 开始，构造时不需要运行时上下文。
#[derive(Debug)]
pub struct RateLimiter {
    period: Duration,
    interval: Option<Interval>,
}

impl RateLimiter {
    pub fn new(batch_size: usize, target_rate: f64, floor: Duration) -> Result<Self> {
        let period = batch_period(batch_size, target_rate, floor)?;
        Ok(Self {
            period,
            interval: None,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 等待下一个许可
    pub async fn acquire(&mut self) {
        let period = self.period;
        self.interval
            .get_or_insert_with(|| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            })
            .tick()
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_period_from_batch_and_rate() {
        let floor = Duration::from_millis(1);
        assert_eq!(
            batch_period(50, 200.0, floor).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            batch_period(50, 90.0, floor).unwrap(),
            Duration::from_secs_f64(50.0 / 90.0)
        );
    }

    #[test]
    fn test_floor_applies_at_high_rates() {
        let period = batch_period(10, 1_000_000.0, Duration::from_millis(1)).unwrap();
        assert_eq!(period, Duration::from_millis(1));
    }

    #[test]
    fn test_unrepresentable_period_is_rejected() {
        let err = batch_period(50, 1e-20, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(
            err,
            LoadgenError::InvalidArgument { ref field, .. } if field == "target_rate"
        ));
        assert!(RateLimiter::new(50, f64::MIN_POSITIVE, Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_invalid_inputs() {
        let floor = Duration::from_millis(1);
        assert!(batch_period(0, 100.0, floor).is_err());
        assert!(batch_period(50, 0.0, floor).is_err());
        assert!(batch_period(50, -3.0, floor).is_err());
        assert!(batch_period(50, f64::NAN, floor).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_permit_is_immediate_then_paced() {
        let mut limiter = RateLimiter::new(50, 200.0, Duration::from_millis(1)).unwrap();
        let start = Instant::now();

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_converges_to_target() {
        // 10 秒内以 90 events/s、批大小 50 运行
        let mut limiter = RateLimiter::new(50, 90.0, Duration::from_millis(1)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut sent = 0u64;

        loop {
            limiter.acquire().await;
            if Instant::now() >= deadline {
                break;
            }
            sent += 50;
        }

        let expected = 900.0;
        assert!((sent as f64 - expected).abs() <= expected * 0.1, "sent = {sent}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_permits_are_delayed_not_burst() {
        let mut limiter = RateLimiter::new(1, 10.0, Duration::from_millis(1)).unwrap();
        limiter.acquire().await;

        // 模拟一次耗时远超周期的批次
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;

        assert_eq!(before.elapsed(), Duration::from_millis(100));
    }
}
