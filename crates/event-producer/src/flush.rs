//! 周期 flush
//!
//! 定期以较短超时驱动客户端投递缓冲消息并触发投递回调。
//! 这只是弱背压：队列未排空时只记录警告，不会限制 worker 的生产速率。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use loadgen_shared::kafka::BrokerClient;
use loadgen_shared::observability::metrics as producer_metrics;

use crate::shutdown::ShutdownListener;

pub struct FlushScheduler {
    client: Arc<dyn BrokerClient>,
    period: Duration,
    timeout: Duration,
}

impl FlushScheduler {
    pub fn new(client: Arc<dyn BrokerClient>, period: Duration, timeout: Duration) -> Self {
        Self {
            client,
            period,
            timeout,
        }
    }

    /// 执行一次有界 flush，返回仍在队列中的消息数
    pub async fn flush_once(&self) -> usize {
        let client = self.client.clone();
        let timeout = self.timeout;
        let remaining = match tokio::task::spawn_blocking(move || client.flush(timeout)).await {
            Ok(remaining) => remaining,
            Err(e) => {
                error!(error = %e, "flush 任务失败");
                self.client.in_flight()
            }
        };

        producer_metrics::set_flush_remaining(remaining);
        if remaining > 0 {
            warn!(remaining, "flush 后仍有消息在队列中");
        } else {
            debug!("flush 完成，队列已排空");
        }
        remaining
    }

    /// 按周期 flush，直到收到停止信号
    ///
    /// 首次 flush 在一个完整周期之后。
    pub async fn run(self, mut shutdown: ShutdownListener) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    self.flush_once().await;
                }
            }
        }
    }
}
