//! 投递统计与吞吐报告
//!
//! 计数器全部是原子量：worker 同步累加 sent，Kafka 的投递回调在 librdkafka 线程上
//! 累加 delivered / errors。读取快照时先读结果计数再读 sent，保证
//! `delivered + errors <= sent` 在任意观察点成立。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use loadgen_shared::events::EventKind;
use loadgen_shared::kafka::{DeliveryListener, DeliveryOutcome};
use loadgen_shared::observability::metrics as producer_metrics;

use crate::shutdown::ShutdownListener;

/// 可累加的计数项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Sent(EventKind),
    Delivered,
    Errors,
}

/// 某一时刻的计数快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryStats {
    pub interaction_sent: u64,
    pub telemetry_sent: u64,
    pub delivered: u64,
    pub errors: u64,
}

impl DeliveryStats {
    pub fn total_sent(&self) -> u64 {
        self.interaction_sent + self.telemetry_sent
    }

    pub fn sent(&self, kind: EventKind) -> u64 {
        match kind {
            EventKind::Interaction => self.interaction_sent,
            EventKind::Telemetry => self.telemetry_sent,
        }
    }

    /// 已得到结果（成功或失败）的消息数
    pub fn resolved(&self) -> u64 {
        self.delivered + self.errors
    }
}

/// 一次报告的计算结果
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputReport {
    pub stats: DeliveryStats,
    /// 自进程启动以来的平均速率
    pub average_rate: f64,
    /// 自上次报告以来的速率
    pub recent_rate: f64,
}

impl ThroughputReport {
    /// 人类可读的多行文本
    pub fn render(&self) -> String {
        let s = &self.stats;
        format!(
            "THROUGHPUT STATS:\n   Total Events: {}\n   Events/sec: {:.1} (avg) | {:.1} (recent)\n   Interaction: {} | Telemetry: {}\n   Errors: {}\n   Delivery Success: {}",
            s.total_sent(),
            self.average_rate,
            self.recent_rate,
            s.interaction_sent,
            s.telemetry_sent,
            s.errors,
            s.delivered,
        )
    }
}

#[derive(Debug)]
struct ReportMark {
    at: Instant,
    total: u64,
}

/// 投递监视器
///
/// 进程生命周期内只增不减，不持久化。
#[derive(Debug)]
pub struct DeliveryMonitor {
    sent: [AtomicU64; 2],
    delivered: AtomicU64,
    errors: AtomicU64,
    started: Instant,
    last_report: Mutex<ReportMark>,
}

impl Default for DeliveryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryMonitor {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            sent: [AtomicU64::new(0), AtomicU64::new(0)],
            delivered: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: now,
            last_report: Mutex::new(ReportMark { at: now, total: 0 }),
        }
    }

    pub fn increment(&self, metric: Metric, amount: u64) {
        let counter = match metric {
            Metric::Sent(kind) => &self.sent[kind.index()],
            Metric::Delivered => &self.delivered,
            Metric::Errors => &self.errors,
        };
        counter.fetch_add(amount, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> DeliveryStats {
        let errors = self.errors.load(Ordering::SeqCst);
        let delivered = self.delivered.load(Ordering::SeqCst);
        DeliveryStats {
            interaction_sent: self.sent[EventKind::Interaction.index()].load(Ordering::SeqCst),
            telemetry_sent: self.sent[EventKind::Telemetry.index()].load(Ordering::SeqCst),
            delivered,
            errors,
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// 计算并输出一次吞吐报告，同时推进“上次报告”时间点
    pub fn report(&self) -> ThroughputReport {
        let report = self.compute_report(Instant::now());

        let s = &report.stats;
        info!(
            total = s.total_sent(),
            interaction_sent = s.interaction_sent,
            telemetry_sent = s.telemetry_sent,
            delivered = s.delivered,
            errors = s.errors,
            average_rate = report.average_rate,
            recent_rate = report.recent_rate,
            "吞吐统计"
        );
        info!("\n{}", report.render());
        producer_metrics::set_progress(
            s.total_sent().saturating_sub(s.resolved()) as usize,
            report.average_rate,
        );

        report
    }

    pub(crate) fn compute_report(&self, now: Instant) -> ThroughputReport {
        let stats = self.snapshot();
        let total = stats.total_sent();

        let mut mark = self.last_report.lock();
        let average_rate = rate(total, now.saturating_duration_since(self.started));
        let recent_rate = rate(
            total.saturating_sub(mark.total),
            now.saturating_duration_since(mark.at),
        );
        *mark = ReportMark { at: now, total };

        ThroughputReport {
            stats,
            average_rate,
            recent_rate,
        }
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

impl DeliveryListener for DeliveryMonitor {
    fn on_delivery(&self, topic: &str, outcome: DeliveryOutcome) {
        producer_metrics::record_delivery(outcome.is_success());
        match outcome {
            DeliveryOutcome::Delivered => self.increment(Metric::Delivered, 1),
            DeliveryOutcome::Failed(reason) => {
                self.increment(Metric::Errors, 1);
                warn!(topic, error = %reason, "投递失败");
            }
        }
    }
}

/// 周期报告任务
///
/// 首次报告在一个完整周期之后；收到关闭信号即退出，最终报告由关闭流程负责。
pub async fn run_reporter(
    monitor: std::sync::Arc<DeliveryMonitor>,
    period: Duration,
    mut shutdown: ShutdownListener,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                monitor.report();
            }
        }
    }
}
