//! 生产引擎
//!
//! `EngineContext` 在启动时构造一次，持有所有共享资源；`ProductionEngine::start`
//! 为每个事件类别启动一个 worker，另外启动报告任务与 flush 任务，
//! 返回的 `RunningEngine` 负责关闭。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use loadgen_shared::config::{AppConfig, TopicsConfig};
use loadgen_shared::error::{LoadgenError, Result};
use loadgen_shared::events::EventKind;
use loadgen_shared::kafka::{BrokerClient, KafkaBrokerClient, connect_with_retry};
use loadgen_shared::retry::RetryPolicy;

use crate::flush::FlushScheduler;
use crate::generator::EventGenerator;
use crate::monitor::{DeliveryMonitor, run_reporter};
use crate::rate_limiter::RateLimiter;
use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome};
use crate::worker::RateControlledWorker;

/// 引擎运行参数，启动后不可变
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub batch_size: usize,
    pub interaction_rate: f64,
    pub telemetry_rate: f64,
    pub min_sleep: Duration,
    pub report_interval: Duration,
    pub flush_interval: Duration,
    pub flush_timeout: Duration,
    pub shutdown_flush_timeout: Duration,
    /// 关闭时等待每个任务退出的上限
    pub join_timeout: Duration,
    pub recovery: RetryPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let generator = &config.generator;
        let engine = &config.engine;
        Self {
            batch_size: generator.batch_size,
            interaction_rate: generator.interaction_rate(),
            telemetry_rate: generator.telemetry_rate(),
            min_sleep: generator.min_sleep(),
            report_interval: Duration::from_secs(engine.report_interval_secs),
            flush_interval: Duration::from_secs(engine.flush_interval_secs),
            flush_timeout: Duration::from_millis(engine.flush_timeout_ms),
            shutdown_flush_timeout: Duration::from_secs(engine.shutdown_flush_timeout_secs),
            join_timeout: Duration::from_secs(engine.join_timeout_secs),
            recovery: engine.recovery.to_policy(),
        }
    }

    /// 检查周期任务参数，周期为 0 的 tokio interval 无法构造
    pub fn validate(&self) -> Result<()> {
        for (field, period) in [
            ("report_interval", self.report_interval),
            ("flush_interval", self.flush_interval),
        ] {
            if period.is_zero() {
                return Err(LoadgenError::InvalidArgument {
                    field: field.to_string(),
                    message: "周期必须大于 0".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn rate_for(&self, kind: EventKind) -> f64 {
        match kind {
            EventKind::Interaction => self.interaction_rate,
            EventKind::Telemetry => self.telemetry_rate,
        }
    }
}

/// 引擎共享资源
#[derive(Clone)]
pub struct EngineContext {
    pub client: Arc<dyn BrokerClient>,
    pub monitor: Arc<DeliveryMonitor>,
    pub generator: Arc<EventGenerator>,
    pub topics: TopicsConfig,
    pub settings: EngineSettings,
}

impl EngineContext {
    pub fn topic_for(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Interaction => &self.topics.interaction,
            EventKind::Telemetry => &self.topics.telemetry,
        }
    }

    /// 连接 Kafka 并构造上下文
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let kafka = config.kafka.clone();
        Self::connect_with(config, move |monitor| {
            let kafka = kafka.clone();
            async move {
                let client = tokio::task::spawn_blocking(move || {
                    KafkaBrokerClient::connect(&kafka, monitor)
                })
                .await
                .map_err(|e| LoadgenError::Internal(format!("连接任务失败: {e}")))??;
                Ok::<_, LoadgenError>(Arc::new(client) as Arc<dyn BrokerClient>)
            }
        })
        .await
    }

    /// 使用给定的连接器构造上下文
    ///
    /// 连接按 `kafka.connect_attempts` / `kafka.connect_backoff_ms` 固定间隔重试，
    /// 全部失败时返回 `LoadgenError::Connection`。
    pub async fn connect_with<F, Fut>(config: &AppConfig, mut connector: F) -> Result<Self>
    where
        F: FnMut(Arc<DeliveryMonitor>) -> Fut,
        Fut: Future<Output = Result<Arc<dyn BrokerClient>>>,
    {
        let monitor = Arc::new(DeliveryMonitor::new());
        let policy = config.kafka.connect_policy();

        let client = connect_with_retry(&policy, || connector(monitor.clone())).await?;

        Ok(Self {
            client,
            monitor,
            generator: Arc::new(EventGenerator::from_config(&config.generator)),
            topics: config.topics.clone(),
            settings: EngineSettings::from_config(config),
        })
    }
}

pub struct ProductionEngine;

impl ProductionEngine {
    /// 启动全部 worker 与后台任务
    ///
    /// 参数非法（批大小为 0、速率非正或过小、周期为 0）时不会启动任何任务。
    pub fn start(ctx: EngineContext) -> Result<RunningEngine> {
        let settings = &ctx.settings;
        settings.validate()?;

        let mut workers = Vec::with_capacity(EventKind::ALL.len());
        for kind in EventKind::ALL {
            let limiter = RateLimiter::new(
                settings.batch_size,
                settings.rate_for(kind),
                settings.min_sleep,
            )?;
            workers.push(RateControlledWorker::new(
                kind,
                ctx.topic_for(kind),
                settings.batch_size,
                limiter,
                settings.recovery.clone(),
                ctx.generator.clone(),
                ctx.client.clone(),
                ctx.monitor.clone(),
            ));
        }

        let coordinator = Arc::new(ShutdownCoordinator::new(
            ctx.client.clone(),
            ctx.monitor.clone(),
            settings.shutdown_flush_timeout,
            settings.join_timeout,
        ));

        for worker in workers {
            let name = format!("{}-worker", worker.kind());
            let phase = worker.phase();
            let listener = coordinator.listener();
            let handle = tokio::spawn(async move {
                worker.run(listener).await;
            });
            coordinator.register(name, handle, Some(phase));
        }

        let reporter = tokio::spawn(run_reporter(
            ctx.monitor.clone(),
            settings.report_interval,
            coordinator.listener(),
        ));
        coordinator.register("reporter", reporter, None);

        let flusher = FlushScheduler::new(
            ctx.client.clone(),
            settings.flush_interval,
            settings.flush_timeout,
        );
        let flush_handle = tokio::spawn(flusher.run(coordinator.listener()));
        coordinator.register("flusher", flush_handle, None);

        info!(
            pool_user_ids = ctx.generator.pools().user_ids.len(),
            pool_device_ids = ctx.generator.pools().device_ids.len(),
            interaction_rate = settings.interaction_rate,
            telemetry_rate = settings.telemetry_rate,
            batch_size = settings.batch_size,
            "生产引擎已启动"
        );

        Ok(RunningEngine {
            coordinator,
            monitor: ctx.monitor,
        })
    }
}

/// 运行中的引擎句柄
pub struct RunningEngine {
    coordinator: Arc<ShutdownCoordinator>,
    monitor: Arc<DeliveryMonitor>,
}

impl RunningEngine {
    pub fn monitor(&self) -> &Arc<DeliveryMonitor> {
        &self.monitor
    }

    /// 触发关闭，幂等
    pub async fn shutdown(&self) -> ShutdownOutcome {
        self.coordinator.shutdown().await
    }

    /// 运行直到 `signal` 完成，然后关闭
    pub async fn run_until<S: Future<Output = ()>>(self, signal: S) -> ShutdownOutcome {
        signal.await;
        self.shutdown().await
    }
}
