//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为 `BrokerClient` 抽象：提交是非阻塞的，
//! 投递结果只通过 `DeliveryListener` 回调以及 poll/flush 观察到。
//! librdkafka 的生产者句柄本身支持多线程并发调用，所以多个 worker 与 flush 任务
//! 可以直接共享同一个 `Arc<dyn BrokerClient>`。

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rdkafka::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::{LoadgenError, Result};
use crate::retry::{RetryPolicy, retry_with_policy};

// ---------------------------------------------------------------------------
// 投递回调
// ---------------------------------------------------------------------------

/// 单条消息的异步投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// 投递结果的接收方
///
/// 回调在 librdkafka 的 poll/flush 调用线程上执行，实现必须是线程安全且不阻塞的。
pub trait DeliveryListener: Send + Sync {
    fn on_delivery(&self, topic: &str, outcome: DeliveryOutcome);
}

// ---------------------------------------------------------------------------
// BrokerClient: 外部依赖边界
// ---------------------------------------------------------------------------

/// 消息代理客户端
///
/// 所有方法都可以被多个任务并发调用。`flush` 是唯一会阻塞的方法，
/// 异步上下文中应放到 `spawn_blocking` 中执行。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait BrokerClient: Send + Sync {
    /// 提交一条消息到本地发送队列，不等待 broker 确认
    ///
    /// 返回错误表示消息未进入队列（如队列已满），此时不会有投递回调。
    fn submit(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()>;

    /// 非阻塞地处理已就绪的投递回调
    fn poll(&self);

    /// 阻塞等待队列排空，最多等待 `timeout`，返回仍未投递的消息数
    fn flush(&self, timeout: Duration) -> usize;

    /// 已提交但尚未得到投递结果的消息数
    fn in_flight(&self) -> usize;
}

// ---------------------------------------------------------------------------
// KafkaBrokerClient: rdkafka 实现
// ---------------------------------------------------------------------------

/// 将 rdkafka 的投递报告转发给 `DeliveryListener`
pub struct DeliveryReporter {
    listener: Arc<dyn DeliveryListener>,
}

impl ClientContext for DeliveryReporter {}

impl ProducerContext for DeliveryReporter {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        match delivery_result {
            Ok(msg) => {
                debug!(
                    topic = msg.topic(),
                    partition = msg.partition(),
                    offset = msg.offset(),
                    "消息已投递"
                );
                self.listener.on_delivery(msg.topic(), DeliveryOutcome::Delivered);
            }
            Err((err, msg)) => {
                warn!(topic = msg.topic(), error = %err, "消息投递失败");
                self.listener
                    .on_delivery(msg.topic(), DeliveryOutcome::Failed(err.to_string()));
            }
        }
    }
}

/// 基于 rdkafka `BaseProducer` 的客户端
pub struct KafkaBrokerClient {
    producer: BaseProducer<DeliveryReporter>,
}

impl KafkaBrokerClient {
    /// 创建生产者并通过拉取集群元数据验证连通性
    ///
    /// 元数据请求是阻塞调用，异步上下文中应放到 `spawn_blocking` 中执行。
    pub fn connect(config: &KafkaConfig, listener: Arc<dyn DeliveryListener>) -> Result<Self> {
        let producer: BaseProducer<DeliveryReporter> = producer_config(config)
            .create_with_context(DeliveryReporter { listener })
            .map_err(|e| LoadgenError::Kafka(format!("创建生产者失败: {e}")))?;

        let metadata = producer
            .client()
            .fetch_metadata(None, config.metadata_timeout())
            .map_err(|e| LoadgenError::Kafka(format!("获取集群元数据失败: {e}")))?;

        let topics: Vec<&str> = metadata.topics().iter().map(|t| t.name()).collect();
        info!(
            brokers = %config.brokers,
            broker_count = metadata.brokers().len(),
            topics = ?topics,
            "已连接 Kafka 集群"
        );

        Ok(Self { producer })
    }
}

impl BrokerClient for KafkaBrokerClient {
    fn submit(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        let record = BaseRecord::to(topic).key(key).payload(payload);
        self.producer
            .send(record)
            .map_err(|(err, _record)| LoadgenError::Submission {
                topic: topic.to_string(),
                message: err.to_string(),
            })
    }

    fn poll(&self) {
        self.producer.poll(Duration::ZERO);
    }

    fn flush(&self, timeout: Duration) -> usize {
        match self.producer.flush(timeout) {
            Ok(()) => 0,
            Err(KafkaError::Flush(code)) => {
                debug!(error = %code, "flush 超时");
                self.in_flight()
            }
            Err(e) => {
                warn!(error = %e, "flush 失败");
                self.in_flight()
            }
        }
    }

    fn in_flight(&self) -> usize {
        self.producer.in_flight_count().max(0) as usize
    }
}

/// 由配置构建生产者参数
pub fn producer_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.brokers)
        .set("client.id", &config.client_id)
        .set("acks", &config.acks)
        .set("batch.size", config.batch_size_bytes.to_string())
        .set("linger.ms", config.linger_ms.to_string())
        .set("compression.type", &config.compression)
        .set(
            "queue.buffering.max.messages",
            config.queue_buffering_max_messages.to_string(),
        )
        .set("retries", config.retries.to_string())
        .set("retry.backoff.ms", config.retry_backoff_ms.to_string())
        .set("message.timeout.ms", config.message_timeout_ms.to_string());
    client_config
}

// ---------------------------------------------------------------------------
// 启动连接重试
// ---------------------------------------------------------------------------

/// 按策略重复建立连接
///
/// 所有尝试都失败时返回 `LoadgenError::Connection`，其中 `attempts` 为实际尝试次数。
pub async fn connect_with_retry<F, Fut, C>(policy: &RetryPolicy, mut connector: F) -> Result<C>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<C>>,
{
    let attempts = AtomicU32::new(0);
    let max_attempts = policy.max_attempts();

    let result = retry_with_policy(
        policy,
        "kafka_connect",
        |_| true,
        || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            info!(attempt, max_attempts, "尝试连接 Kafka");
            connector()
        },
    )
    .await;

    result.map_err(|err| LoadgenError::Connection {
        attempts: attempts.load(Ordering::SeqCst),
        message: err.to_string(),
    })
}
