//! 速率受控的生产 worker
//!
//! 每个事件类别一个 worker：取许可 → 生成整批 → 逐条提交 → 非阻塞 poll。
//! 提交失败时放弃本批剩余事件，按恢复策略等待后继续，永不退出循环，
//! 直到收到停止信号。等待可以被停止信号打断，但一批事件的提交不会被中途打断。

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use loadgen_shared::error::Result;
use loadgen_shared::events::EventKind;
use loadgen_shared::kafka::BrokerClient;
use loadgen_shared::observability::metrics as producer_metrics;
use loadgen_shared::retry::RetryPolicy;

use crate::generator::EventGenerator;
use crate::monitor::{DeliveryMonitor, Metric};
use crate::rate_limiter::RateLimiter;
use crate::shutdown::{PhaseCell, ShutdownListener, WorkerPhase};

/// 单批提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    /// 成功进入客户端队列的事件数
    pub submitted: usize,
}

/// worker 退出时的汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerSummary {
    pub batches: u64,
    pub failed_batches: u64,
}

pub struct RateControlledWorker {
    kind: EventKind,
    topic: String,
    batch_size: usize,
    limiter: RateLimiter,
    recovery: RetryPolicy,
    generator: Arc<EventGenerator>,
    client: Arc<dyn BrokerClient>,
    monitor: Arc<DeliveryMonitor>,
    phase: Arc<PhaseCell>,
}

impl RateControlledWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: EventKind,
        topic: impl Into<String>,
        batch_size: usize,
        limiter: RateLimiter,
        recovery: RetryPolicy,
        generator: Arc<EventGenerator>,
        client: Arc<dyn BrokerClient>,
        monitor: Arc<DeliveryMonitor>,
    ) -> Self {
        Self {
            kind,
            topic: topic.into(),
            batch_size,
            limiter,
            recovery,
            generator,
            client,
            monitor,
            phase: Arc::new(PhaseCell::default()),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn phase(&self) -> Arc<PhaseCell> {
        self.phase.clone()
    }

    /// 生成并提交一批事件
    ///
    /// 每条事件在提交前计入 sent；提交失败计入一次 errors 并放弃本批剩余事件。
    pub fn produce_batch(&self) -> Result<BatchResult> {
        let started = Instant::now();
        let events = self.generator.produce_batch(self.kind, self.batch_size);

        let mut submitted = 0usize;
        let mut outcome = Ok(());
        for event in &events {
            self.monitor.increment(Metric::Sent(self.kind), 1);
            let result = event.to_payload().and_then(|payload| {
                self.client
                    .submit(&self.topic, event.partition_key().as_bytes(), &payload)
            });
            if let Err(e) = result {
                self.monitor.increment(Metric::Errors, 1);
                outcome = Err(e);
                break;
            }
            submitted += 1;
        }

        self.client.poll();

        let rejected = u64::from(outcome.is_err());
        producer_metrics::record_batch(
            self.kind.as_str(),
            submitted as u64 + rejected,
            rejected,
            started.elapsed().as_secs_f64(),
        );

        outcome.map(|()| BatchResult { submitted })
    }

    /// 运行生产循环直到收到停止信号
    pub async fn run(mut self, mut shutdown: ShutdownListener) -> WorkerSummary {
        info!(
            kind = %self.kind,
            topic = %self.topic,
            batch_size = self.batch_size,
            period_ms = self.limiter.period().as_secs_f64() * 1000.0,
            "生产 worker 已启动"
        );

        let mut summary = WorkerSummary::default();
        let mut failure_streak: u32 = 0;

        loop {
            if shutdown.is_shutdown() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = self.limiter.acquire() => {}
            }
            if shutdown.is_shutdown() {
                break;
            }

            summary.batches += 1;
            match self.produce_batch() {
                Ok(result) => {
                    failure_streak = 0;
                    debug!(kind = %self.kind, submitted = result.submitted, "批次已提交");
                }
                Err(e) => {
                    summary.failed_batches += 1;
                    let delay = self.recovery.delay_for_attempt(failure_streak);
                    failure_streak = failure_streak.saturating_add(1);
                    warn!(
                        kind = %self.kind,
                        error = %e,
                        code = e.code(),
                        failure_streak,
                        delay_ms = delay.as_millis() as u64,
                        "批次提交失败，等待后继续"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.phase.advance(WorkerPhase::Drained);
        info!(
            kind = %self.kind,
            batches = summary.batches,
            failed_batches = summary.failed_batches,
            "生产 worker 已退出"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use loadgen_shared::config::{GeneratorConfig, PoolSizes};
    use loadgen_shared::error::LoadgenError;
    use loadgen_shared::kafka::MockBrokerClient;
    use loadgen_shared::test_utils::InMemoryBrokerClient;

    fn generator() -> Arc<EventGenerator> {
        Arc::new(EventGenerator::from_config(&GeneratorConfig {
            pools: PoolSizes {
                user_ids: 10,
                device_ids: 10,
                user_agents: 2,
                cities: 2,
            },
            ..GeneratorConfig::default()
        }))
    }

    fn worker(
        kind: EventKind,
        client: Arc<dyn BrokerClient>,
        monitor: Arc<DeliveryMonitor>,
    ) -> RateControlledWorker {
        RateControlledWorker::new(
            kind,
            "topic",
            10,
            RateLimiter::new(10, 100.0, Duration::from_millis(1)).unwrap(),
            RetryPolicy::fixed(u32::MAX, Duration::from_millis(100)),
            generator(),
            client,
            monitor,
        )
    }

    #[test]
    fn test_batch_keys_match_identity_field() {
        let monitor = Arc::new(DeliveryMonitor::new());
        let client = Arc::new(InMemoryBrokerClient::new(monitor.clone()));
        let worker = worker(EventKind::Telemetry, client.clone(), monitor.clone());

        let result = worker.produce_batch().unwrap();

        assert_eq!(result.submitted, 10);
        let messages = client.delivered_messages();
        assert_eq!(messages.len(), 10);
        for msg in messages {
            let value: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
            assert_eq!(value["device_id"].as_str().unwrap().as_bytes(), msg.key.as_slice());
        }
        assert_eq!(monitor.snapshot().telemetry_sent, 10);
        assert_eq!(monitor.snapshot().delivered, 10);
    }

    #[test]
    fn test_submission_failure_aborts_rest_of_batch() {
        let monitor = Arc::new(DeliveryMonitor::new());
        let mut mock = MockBrokerClient::new();
        let mut calls = 0;
        mock.expect_submit().times(4).returning(move |topic, _, _| {
            calls += 1;
            if calls < 4 {
                Ok(())
            } else {
                Err(LoadgenError::Submission {
                    topic: topic.to_string(),
                    message: "Local: Queue full".to_string(),
                })
            }
        });
        mock.expect_poll().times(1).return_const(());

        let worker = worker(EventKind::Interaction, Arc::new(mock), monitor.clone());
        let err = worker.produce_batch().unwrap_err();

        assert_eq!(err.code(), "SUBMISSION_ERROR");
        let stats = monitor.snapshot();
        assert_eq!(stats.interaction_sent, 4);
        assert_eq!(stats.errors, 1);
        assert!(stats.resolved() <= stats.total_sent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_recovers_after_failures() {
        let monitor = Arc::new(DeliveryMonitor::new());
        let client = Arc::new(InMemoryBrokerClient::new(monitor.clone()));
        client.update_behaviour(|b| b.reject_submissions = true);
        let worker = worker(EventKind::Interaction, client.clone(), monitor.clone());

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(worker.run(ShutdownListener::from(rx)));

        tokio::time::sleep(Duration::from_millis(350)).await;
        client.update_behaviour(|b| b.reject_submissions = false);
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send_replace(true);

        let summary = handle.await.unwrap();
        assert!(summary.failed_batches >= 3);
        assert!(summary.batches > summary.failed_batches);
        assert!(monitor.snapshot().delivered > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_promptly_on_signal() {
        let monitor = Arc::new(DeliveryMonitor::new());
        let client = Arc::new(InMemoryBrokerClient::new(monitor.clone()));
        let worker = RateControlledWorker::new(
            EventKind::Telemetry,
            "iot",
            10,
            // 每 10 秒一批
            RateLimiter::new(10, 1.0, Duration::from_millis(1)).unwrap(),
            RetryPolicy::fixed(u32::MAX, Duration::from_millis(100)),
            generator(),
            client,
            monitor.clone(),
        );
        let phase = worker.phase();

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(worker.run(ShutdownListener::from(rx)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = tokio::time::Instant::now();
        tx.send_replace(true);
        let summary = handle.await.unwrap();

        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(summary.batches, 1);
        assert_eq!(phase.get(), WorkerPhase::Drained);
    }
}
